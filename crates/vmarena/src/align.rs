//! Power-of-two rounding helpers shared by the bump and commit paths.

/// Round `value` up to the next multiple of `align`.
///
/// Returns `None` if the result does not fit in `usize`. `align` must be
/// a power of two.
#[inline]
pub(crate) fn checked_align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    let mask = align - 1;
    Some(value.checked_add(mask)? & !mask)
}

/// Round `value` up to the next multiple of `align`, saturating at the
/// largest multiple of `align` that fits in `usize`.
#[inline]
pub(crate) fn saturating_align_up(value: usize, align: usize) -> usize {
    checked_align_up(value, align).unwrap_or(usize::MAX & !(align - 1))
}
