//! Splitting outbound payloads into MTU-sized link-layer packets.

use smallvec::SmallVec;

/// One outbound link-layer packet. Payloads at the minimum MTU stay inline.
pub type Fragment = SmallVec<[u8; 64]>;

/// Splits `payload` into packets of at most `mtu` bytes, preserving order.
///
/// An empty payload yields no fragments.
///
/// # Panics
///
/// Panics if `mtu` is zero.
pub fn fragment(payload: &[u8], mtu: usize) -> impl ExactSizeIterator<Item = Fragment> + '_ {
   assert!(mtu > 0, "cannot fragment to a zero MTU");
   payload.chunks(mtu).map(Fragment::from_slice)
}
