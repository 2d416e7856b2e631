//! Comparisons over the 16-bit wrapping sequence space.
//!
//! Two sequence numbers compare by the sign of their wrapped difference, so
//! ordering holds across wraparound as long as the values are less than
//! 2^15 apart.

/// Returns `true` if `a` is after `b`.
#[inline]
pub fn gt(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) > 0
}

/// Returns `true` if `a` is before `b`.
#[inline]
pub fn lt(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

/// Returns `true` if `a` is `b` or after it.
#[inline]
pub fn geq(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) >= 0
}

/// Returns `true` if `a` is `b` or before it.
#[inline]
pub fn leq(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) <= 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_without_wrap() {
        assert!(gt(5, 3));
        assert!(lt(3, 5));
        assert!(geq(5, 5) && leq(5, 5));
        assert!(!gt(5, 5) && !lt(5, 5));
    }

    #[test]
    fn ordering_across_wrap() {
        assert!(gt(2, 0xfffe));
        assert!(lt(0xfffe, 2));
        assert!(geq(0, 0xffff));
        assert!(leq(0xffff, 0));
    }

    #[test]
    fn half_space_boundary() {
        // Exactly 2^15 apart reads as "before" in both directions.
        assert!(lt(0x8000, 0));
        assert!(lt(0, 0x8000));
        assert!(gt(0x7fff, 0));
    }
}
