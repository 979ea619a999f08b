//! Errors that abort a build.
//!
//! Every error in this module is fatal to the build session that raised it.
//! Nothing is retried; a driver may start a new session,
//! for instance with a lower requested base address.

use {
    crate::{object::ObjectKind, region::RegionKind},
    thiserror::Error,
};

/// Error that aborts a build.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum BuildError
{
    #[error("Unable to allocate {requested} bytes from the {region} region \
             ({available} bytes left); reduce the number of archived objects")]
    OutOfSpace{region: RegionKind, requested: usize, available: usize},

    #[error("Unable to reserve an output buffer of {bytes} bytes \
             aligned to {align} bytes; reduce the size advisories \
             or the number of archived objects")]
    ReservationFailed{bytes: usize, align: usize},

    #[error("Requested base address {requested_base:#x} is too high \
             for an archive spanning [{bottom:#x} - {top:#x}]; \
             rebuild with a lower requested_base_address")]
    BaseAddressTooHigh{requested_base: usize, bottom: usize, top: usize},

    #[error("Another archive build session is active on this thread")]
    SessionActive,

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Archive builder invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
}

/// Logic defect detected while building.
///
/// These indicate a bug in the builder or in one of its collaborators.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvariantViolation
{
    #[error("Pointer {0:#x} is used but its target has not been archived")]
    UnresolvedPointer(usize),

    #[error("Source object {0:#x} is already registered")]
    DuplicateRegistration(usize),

    #[error("Output address {0:#x} is already mapped to a source object")]
    DuplicateOutput(usize),

    #[error("Address {0:#x} is not the output address of any source object")]
    UnknownOutput(usize),

    #[error("{label} estimate of {estimate} bytes is smaller than \
             the {used} bytes used")]
    EstimateTooSmall{label: &'static str, estimate: usize, used: usize},

    #[error("Pointer {value:#x} at buffer offset {offset:#x} lies neither \
             in the output buffer nor in the mapped dependency archive")]
    PointerOutOfRange{offset: usize, value: usize},

    #[error("Pointer {value:#x} relocated to {relocated:#x}, \
             outside of the requested archive range")]
    RelocatedOutOfRange{value: usize, relocated: usize},

    #[error("Field {field:#x} is not a word-aligned field \
             of the {size}-byte object at {object:#x}")]
    BadField{object: usize, field: usize, size: usize},

    #[error("Object {0:#x} is referenced as both mutable and read-only")]
    InconsistentMutability(usize),

    #[error("Interned string {0:#x} was gathered twice")]
    DuplicateInternedString(usize),

    #[error("Regenerated object {substitute:#x} (replacing {original:#x}) \
             was never copied into the archive")]
    SubstituteNotArchived{original: usize, substitute: usize},

    #[error("{kind} object {object:#x} was copied twice")]
    CopiedTwice{kind: ObjectKind, object: usize},

    #[error("Slot at {0:#x} lies outside of the output buffer")]
    SlotOutsideBuffer(usize),

    #[error("Slot at {0:#x} is cleared from the ledger but holds a pointer")]
    ClearingLivePointer(usize),

    #[error("Pipeline step {step} ran out of order")]
    OutOfOrder{step: &'static str},
}

/// Returned when a configuration value is unusable.
#[allow(missing_docs)]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError
{
    #[error("Region alignment {0} is not a power of two of at least a word")]
    RegionAlignment(usize),

    #[error("Requested base address {0:#x} is not aligned to the region alignment")]
    UnalignedBase(usize),
}

/// Convenience alias for results of build operations.
pub type Result<T, E = BuildError> = std::result::Result<T, E>;
