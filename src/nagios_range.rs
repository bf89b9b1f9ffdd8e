//! Nagios-style threshold ranges:
//! `start:end`, `~` for negative infinity, a leading `@` to invert the
//! match.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Bound {
    NegInfinity,
    Value(f64),
}

/// A parsed Nagios range. `contains` already folds in the `@` inversion, so
/// it directly answers "is this value acceptable" — a caller alarms
/// whenever `!range.contains(value)`, for both inverted and
/// non-inverted ranges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    start: Bound,
    end: f64,
    inverted: bool,
}

impl Range {
    pub fn parse(spec: &str) -> Result<Range> {
        let (inverted, rest) = match spec.strip_prefix('@') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };

        let (start, end_text) = match rest.split_once(':') {
            Some((start, end)) => (parse_bound(start)?, end),
            None => (Bound::Value(0.0), rest),
        };

        let end = if end_text.is_empty() {
            f64::INFINITY
        } else {
            end_text
                .parse()
                .map_err(|_| Error::BadArgument(format!("'{spec}': invalid range")))?
        };

        Ok(Range { start, end, inverted })
    }

    /// `true` if `value` is acceptable: inside `[start, end]` normally, or
    /// outside it for an `@`-inverted range.
    pub fn contains(&self, value: f64) -> bool {
        let above_start = match self.start {
            Bound::NegInfinity => true,
            Bound::Value(start) => value >= start,
        };
        let inside = above_start && value <= self.end;
        inside != self.inverted
    }
}

fn parse_bound(text: &str) -> Result<Bound> {
    if text == "~" {
        return Ok(Bound::NegInfinity);
    }
    text.parse()
        .map(Bound::Value)
        .map_err(|_| Error::BadArgument(format!("'{text}': invalid range start")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_number_means_0_to_n() {
        let r = Range::parse("10").unwrap();
        assert!(r.contains(0.0));
        assert!(r.contains(10.0));
        assert!(!r.contains(10.1));
        assert!(!r.contains(-0.1));
    }

    #[test]
    fn start_colon_end_bounds_both_sides() {
        let r = Range::parse("10:20").unwrap();
        assert!(!r.contains(9.9));
        assert!(r.contains(10.0));
        assert!(r.contains(20.0));
        assert!(!r.contains(20.1));
    }

    #[test]
    fn tilde_colon_end_means_negative_infinity_to_end() {
        let r = Range::parse("~:5").unwrap();
        assert!(r.contains(-1_000_000.0));
        assert!(r.contains(5.0));
        assert!(!r.contains(5.1));
    }

    #[test]
    fn start_colon_with_no_end_means_unbounded_above() {
        let r = Range::parse("10:").unwrap();
        assert!(r.contains(10.0));
        assert!(r.contains(f64::MAX));
        assert!(!r.contains(9.9));
    }

    #[test]
    fn leading_at_inverts_the_match() {
        let r = Range::parse("@10:20").unwrap();
        assert!(!r.contains(15.0));
        assert!(r.contains(25.0));
        assert!(r.contains(5.0));
    }

    #[test]
    fn rejects_garbage() {
        assert!(Range::parse("not-a-range").is_err());
    }
}
