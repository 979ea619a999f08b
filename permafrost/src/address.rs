//! Addresses in the coordinate systems of a build.
//!
//! Three coordinate systems take part in building an archive:
//!
//!  - [`Buffer`]: addresses inside the output buffer of this build.
//!  - [`Mapped`]: addresses inside a previously built dependency archive,
//!    where that archive is currently mapped into this process.
//!  - [`Requested`]: addresses at which archives are designed to be mapped
//!    when a later process loads them.
//!
//! Every address is tagged with its coordinate system at the type level,
//! and conversion between systems happens only through a [`Delta`],
//! whose application is checked for overflow.

use {
    std::{cmp::Ordering, fmt, hash::{Hash, Hasher}, marker::PhantomData, mem::size_of},
    thiserror::Error,
};

/// Number of bytes in a pointer-sized word.
pub const WORD: usize = size_of::<usize>();

/// Coordinate system that an address is expressed in.
pub trait Space
{
    /// Name used in diagnostics.
    const NAME: &'static str;
}

/// Addresses inside the output buffer.
pub enum Buffer { }

/// Addresses inside the mapped dependency archive.
pub enum Mapped { }

/// Addresses at which archives will be mapped when loaded.
pub enum Requested { }

impl Space for Buffer { const NAME: &'static str = "buffer"; }
impl Space for Mapped { const NAME: &'static str = "mapped"; }
impl Space for Requested { const NAME: &'static str = "requested"; }

/* -------------------------------------------------------------------------- */
/*                                   Address                                  */
/* -------------------------------------------------------------------------- */

/// Address in coordinate system `S`.
pub struct Addr<S>
{
    raw: usize,
    _space: PhantomData<fn() -> S>,
}

impl<S> Addr<S>
{
    /// Tag a raw address with a coordinate system.
    pub const fn new(raw: usize) -> Self
    {
        Self{raw, _space: PhantomData}
    }

    /// The raw address.
    pub const fn get(self) -> usize
    {
        self.raw
    }

    /// The address `bytes` bytes further, if it does not overflow.
    pub fn checked_add(self, bytes: usize) -> Option<Self>
    {
        self.raw.checked_add(bytes).map(Self::new)
    }

    /// The number of bytes from `base` to this address.
    ///
    /// Returns [`None`] if this address is below `base`.
    pub fn offset_from(self, base: Self) -> Option<usize>
    {
        self.raw.checked_sub(base.raw)
    }

    /// Round the address up to a multiple of `align`.
    pub fn align_up(self, align: usize) -> Option<Self>
    {
        align_up(self.raw, align).map(Self::new)
    }
}

impl<S> Clone for Addr<S>
{
    fn clone(&self) -> Self
    {
        *self
    }
}

impl<S> Copy for Addr<S>
{
}

impl<S> PartialEq for Addr<S>
{
    fn eq(&self, other: &Self) -> bool
    {
        self.raw == other.raw
    }
}

impl<S> Eq for Addr<S>
{
}

impl<S> PartialOrd for Addr<S>
{
    fn partial_cmp(&self, other: &Self) -> Option<Ordering>
    {
        Some(self.cmp(other))
    }
}

impl<S> Ord for Addr<S>
{
    fn cmp(&self, other: &Self) -> Ordering
    {
        self.raw.cmp(&other.raw)
    }
}

impl<S> Hash for Addr<S>
{
    fn hash<H>(&self, state: &mut H)
        where H: Hasher
    {
        self.raw.hash(state)
    }
}

impl<S> fmt::Debug for Addr<S>
    where S: Space
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{}:{:#018x}", S::NAME, self.raw)
    }
}

impl<S> fmt::Display for Addr<S>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{:#018x}", self.raw)
    }
}

/* -------------------------------------------------------------------------- */
/*                                Address range                               */
/* -------------------------------------------------------------------------- */

/// Half-open address range `[bottom, top)` in coordinate system `S`.
pub struct AddrRange<S>
{
    bottom: Addr<S>,
    top: Addr<S>,
}

impl<S> AddrRange<S>
{
    /// Create a range from its bounds.
    ///
    /// Returns [`None`] if `top` is below `bottom`.
    pub fn new(bottom: Addr<S>, top: Addr<S>) -> Option<Self>
    {
        (bottom <= top).then_some(Self{bottom, top})
    }

    /// Create a range from its bottom and its length in bytes.
    pub fn from_len(bottom: Addr<S>, len: usize) -> Option<Self>
    {
        let top = bottom.checked_add(len)?;
        Some(Self{bottom, top})
    }

    /// The lowest address in the range.
    pub fn bottom(&self) -> Addr<S>
    {
        self.bottom
    }

    /// The address just past the range.
    pub fn top(&self) -> Addr<S>
    {
        self.top
    }

    /// The number of bytes in the range.
    pub fn len(&self) -> usize
    {
        self.top.raw - self.bottom.raw
    }

    /// Whether the range contains no bytes.
    pub fn is_empty(&self) -> bool
    {
        self.bottom == self.top
    }

    /// Whether the raw address lies in the range.
    pub fn contains(&self, raw: usize) -> bool
    {
        self.bottom.raw <= raw && raw < self.top.raw
    }

    /// Tag a raw address with this range's coordinate system,
    /// provided that it lies in the range.
    pub fn addr_of(&self, raw: usize) -> Option<Addr<S>>
    {
        self.contains(raw).then(|| Addr::new(raw))
    }
}

impl<S> Clone for AddrRange<S>
{
    fn clone(&self) -> Self
    {
        *self
    }
}

impl<S> Copy for AddrRange<S>
{
}

impl<S> PartialEq for AddrRange<S>
{
    fn eq(&self, other: &Self) -> bool
    {
        self.bottom == other.bottom && self.top == other.top
    }
}

impl<S> Eq for AddrRange<S>
{
}

impl<S> fmt::Debug for AddrRange<S>
    where S: Space
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{}:[{} - {})", S::NAME, self.bottom, self.top)
    }
}

/* -------------------------------------------------------------------------- */
/*                                    Delta                                   */
/* -------------------------------------------------------------------------- */

/// Constant shift from coordinate system `F` to coordinate system `T`.
pub struct Delta<F, T>
{
    delta: i128,
    _spaces: PhantomData<fn(F) -> T>,
}

/// Returned when shifting an address leaves the address space.
#[allow(missing_docs)]
#[derive(Debug, Error)]
#[error("Shifting {addr:#x} by {delta} leaves the address space")]
pub struct AddressOverflow
{
    pub addr: usize,
    pub delta: i128,
}

impl<F, T> Delta<F, T>
{
    /// The delta that maps `from` onto `to`.
    pub fn between(from: Addr<F>, to: Addr<T>) -> Self
    {
        let delta = to.raw as i128 - from.raw as i128;
        Self{delta, _spaces: PhantomData}
    }

    /// The number of bytes added by this delta.
    pub fn get(&self) -> i128
    {
        self.delta
    }

    /// Shift an address into the target coordinate system.
    pub fn apply(&self, addr: Addr<F>) -> Result<Addr<T>, AddressOverflow>
    {
        let shifted = addr.raw as i128 + self.delta;
        usize::try_from(shifted)
            .map(Addr::new)
            .map_err(|_| AddressOverflow{addr: addr.raw, delta: self.delta})
    }

    /// Shift both bounds of a range into the target coordinate system.
    pub fn apply_range(&self, range: AddrRange<F>)
        -> Result<AddrRange<T>, AddressOverflow>
    {
        let bottom = self.apply(range.bottom)?;
        let top = self.apply(range.top)?;
        Ok(AddrRange{bottom, top})
    }
}

impl<F, T> Clone for Delta<F, T>
{
    fn clone(&self) -> Self
    {
        *self
    }
}

impl<F, T> Copy for Delta<F, T>
{
}

impl<F, T> fmt::Debug for Delta<F, T>
    where F: Space, T: Space
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{} -> {}: {:+#x}", F::NAME, T::NAME, self.delta)
    }
}

/// Round up `value` to the next multiple of `align`,
/// which must be a power of two.
///
/// Returns [`None`] on overflow.
pub fn align_up(value: usize, align: usize) -> Option<usize>
{
    debug_assert!(align.is_power_of_two());
    value.checked_add(align - 1).map(|v| v & !(align - 1))
}

/// Whether `value` is a multiple of `align`, which must be a power of two.
pub fn is_aligned(value: usize, align: usize) -> bool
{
    debug_assert!(align.is_power_of_two());
    value & (align - 1) == 0
}
