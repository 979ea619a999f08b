//! Discovery and classification of source objects.
//!
//! Gathering happens in two passes over the object graph.
//! The first pass collects type descriptors and interned strings,
//! and estimates the size of the archive.
//! These are then sorted, so that the second pass, which registers
//! every object, visits them in an order that does not depend on
//! where the host happened to allocate them.

use {
    super::{ArchiveBuilder, Stage},
    crate::{
        error::{BuildError, InvariantViolation, Result},
        host::{Edge, Visit},
        object::{Disposition, ObjectKind},
        registry::SourceObjInfo,
    },
    std::collections::HashSet,
    tracing::{debug, info},
};

impl<'h> ArchiveBuilder<'h>
{
    /// Discover, classify, and register every object
    /// reachable from `roots`.
    pub fn gather_source_objs(&mut self, roots: &[usize]) -> Result<()>
    {
        self.expect_stage(Stage::New, "gather_source_objs")?;

        self.gather_type_descriptors_and_strings(roots)?;

        info!("Gathering all archivable objects ... ");
        let sorted: Vec<usize> =
            self.interned_strings.iter()
            .chain(&self.type_descriptors)
            .chain(roots)
            .copied()
            .collect();
        for root in sorted {
            self.visit_for_registration(root)?;
        }

        info!("Gathered {} objects ({} mutable, {} read-only)",
              self.registry.len(),
              self.mutable_objs.objs().len(),
              self.read_only_objs.objs().len());

        self.stage = Stage::Gathered;
        Ok(())
    }

    /// Decide what happens to a reported object.
    fn classify(&self, edge: &Edge) -> Disposition
    {
        if let Some(dependency) = &self.dependency {
            if dependency.mapped.contains(edge.pointee) {
                return Disposition::AliasToExisting;
            }
        }
        if edge.kind.is_transient() || self.is_excluded(edge) {
            return Disposition::NullOut;
        }
        Disposition::Copy
    }

    fn is_excluded(&self, edge: &Edge) -> bool
    {
        if !edge.kind.is_type_descriptor() {
            return false;
        }
        // Array descriptors are not supported in incremental archives yet.
        if edge.kind == ObjectKind::ArrayDescriptor && self.is_incremental() {
            return true;
        }
        self.host.exclusion.is_excluded(edge.pointee, edge.kind)
    }

    /* ---------------------------------------------------------------------- */
    /*                               First pass                               */
    /* ---------------------------------------------------------------------- */

    fn gather_type_descriptors_and_strings(&mut self, roots: &[usize])
        -> Result<()>
    {
        info!("Gathering type descriptors and interned strings ... ");

        let model = self.host.model;
        let mut visited = HashSet::new();
        for &root in roots {
            model.visit(root, &mut |edge| {
                if !visited.insert(edge.pointee) {
                    return Visit::Skip;
                }
                self.gather_type_descriptor_or_string(edge)
            });
        }

        if !self.is_incremental() {
            let placeholder = self.config.placeholder_estimate_bytes;
            self.estimate.record_placeholder(placeholder);
        }

        self.sort_interned_strings()?;
        self.sort_type_descriptors();
        Ok(())
    }

    fn gather_type_descriptor_or_string(&mut self, edge: &Edge) -> Visit
    {
        if self.classify(edge) != Disposition::Copy {
            return Visit::Skip;
        }
        match edge.kind {
            ObjectKind::TypeDescriptor | ObjectKind::ArrayDescriptor => {
                self.type_descriptors.push(edge.pointee);
                self.estimate.record_type_descriptor();
            },
            ObjectKind::InternedString =>
                self.interned_strings.push(edge.pointee),
            _ => (),
        }
        self.estimate.record_object(edge.size);
        Visit::Recurse
    }

    fn sort_interned_strings(&mut self) -> Result<()>
    {
        info!("Sorting interned strings ... ");
        self.interned_strings.sort_unstable();
        if let Some(pair) = self.interned_strings.windows(2).find(|w| w[0] == w[1]) {
            return Err(InvariantViolation::DuplicateInternedString(pair[0]).into());
        }
        Ok(())
    }

    fn sort_type_descriptors(&mut self)
    {
        info!("Sorting type descriptors ... ");
        let model = self.host.model;
        // Stable, so descriptors with equal names keep their discovery order.
        self.type_descriptors.sort_by_cached_key(|&d| model.type_name(d));
    }

    /* ---------------------------------------------------------------------- */
    /*                               Second pass                              */
    /* ---------------------------------------------------------------------- */

    fn visit_for_registration(&mut self, root: usize) -> Result<()>
    {
        let model = self.host.model;
        let mut failure: Option<BuildError> = None;
        model.visit(root, &mut |edge| {
            if failure.is_some() {
                return Visit::Skip;
            }
            self.gather_one_source_obj(edge).unwrap_or_else(|err| {
                failure = Some(err);
                Visit::Skip
            })
        });
        match failure {
            Some(err) => Err(err),
            None      => Ok(()),
        }
    }

    fn gather_one_source_obj(&mut self, edge: &Edge) -> Result<Visit>
    {
        let pointee = edge.pointee;

        self.remember_embedded_pointer_in_enclosing_obj(edge)?;

        // The substitute is archived instead. Once it has been copied,
        // pointers to the original resolve to the copy of the substitute.
        if self.host.substitutes.has_substitute(pointee) {
            if self.regenerated_seen.insert(pointee) {
                debug!("Skipping {:#x}, which was regenerated", pointee);
                self.regenerated.push(pointee);
            }
            return Ok(Visit::Skip);
        }

        let disposition = self.classify(edge);
        if disposition == Disposition::NullOut && edge.kind.is_type_descriptor() {
            debug!("Skipping excluded type descriptor {:#x}", pointee);
        }

        let info = SourceObjInfo::new(
            pointee,
            disposition,
            edge.kind,
            edge.size,
            edge.read_only,
        );
        let (id, created) = self.registry.put_if_absent(info);

        let info = self.registry.info_mut(id);
        if info.read_only() != edge.read_only {
            return Err(InvariantViolation::InconsistentMutability(pointee).into());
        }

        if created && info.should_copy() {
            if info.read_only() {
                self.read_only_objs.append(id, info);
            } else {
                self.mutable_objs.append(id, info);
            }
            // Recurse only into objects that are copied.
            Ok(Visit::Recurse)
        } else {
            Ok(Visit::Skip)
        }
    }

    /// Record the field of the edge in the ledger range of the object
    /// that holds it.
    ///
    /// Fields of objects that are not copied are never rewritten,
    /// so they are not recorded.
    fn remember_embedded_pointer_in_enclosing_obj(&mut self, edge: &Edge)
        -> Result<()>
    {
        let (Some(enclosing), Some(field)) = (edge.enclosing, edge.field)
            else { return Ok(()) };

        let Some(id) = self.registry.id_of(enclosing)
            else { return Ok(()) };

        let info = self.registry.info_mut(id);
        if !info.should_copy() {
            return Ok(());
        }

        let list = if info.read_only() { &mut self.read_only_objs }
                   else { &mut self.mutable_objs };
        list.remember_embedded_pointer(info, field)?;
        Ok(())
    }
}
