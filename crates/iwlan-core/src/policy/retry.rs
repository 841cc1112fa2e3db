//! Retry array parsing and lookup.
//!
//! A retry array is a list of second values. Tokens are plain digits,
//! `"<base>+r<spread>"` (base plus a uniform random offset below `spread`,
//! drawn once at parse time), or a trailing `"-1"` meaning the last real
//! value repeats forever.

use std::sync::LazyLock;

use rand::{Rng, RngExt};
use regex::Regex;

use super::PolicyError;

const INFINITE_MARKER: &str = "-1";

static RANDOMIZED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)\+r(\d+)$").expect("static regex is valid"));

/// Parsed retry schedule.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RetryArray {
    /// Retry delays in seconds, without the infinite marker.
    times: Vec<u64>,
    /// Whether the array ended with `-1`.
    repeat_last: bool,
}

impl RetryArray {
    /// Parse retry tokens, resolving randomized entries with the thread RNG.
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Result<Self, PolicyError> {
        Self::parse_with_rng(tokens, &mut rand::rng())
    }

    /// Parse retry tokens with a caller-supplied RNG.
    pub fn parse_with_rng<S: AsRef<str>>(
        tokens: &[S],
        rng: &mut impl Rng,
    ) -> Result<Self, PolicyError> {
        let mut times = Vec::with_capacity(tokens.len());
        let mut repeat_last = false;
        let last = tokens.len().saturating_sub(1);

        for (index, token) in tokens.iter().enumerate() {
            let token = token.as_ref().trim();
            if token == INFINITE_MARKER {
                if index != last || index == 0 {
                    return Err(PolicyError::MisplacedInfiniteMarker { index });
                }
                repeat_last = true;
                continue;
            }
            times.push(parse_retry_time(token, rng)?);
        }

        Ok(Self { times, repeat_last })
    }

    /// Build from already-resolved values.
    pub const fn from_times(times: Vec<u64>, repeat_last: bool) -> Self {
        Self { times, repeat_last }
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub const fn repeats_last(&self) -> bool {
        self.repeat_last
    }

    pub fn times(&self) -> &[u64] {
        &self.times
    }

    /// Retry delay in seconds for the `index`-th consecutive failure.
    ///
    /// `None` when the array has no entry for `index`: the array is empty,
    /// or it is finite and `index` runs past its end.
    pub fn retry_time(&self, index: usize) -> Option<u64> {
        let index = if self.repeat_last {
            index.min(self.times.len().saturating_sub(1))
        } else {
            index
        };
        self.times.get(index).copied()
    }
}

fn parse_retry_time(token: &str, rng: &mut impl Rng) -> Result<u64, PolicyError> {
    if !token.is_empty() && token.bytes().all(|b| b.is_ascii_digit()) {
        return token
            .parse()
            .map_err(|_| PolicyError::InvalidRetryTime(token.to_string()));
    }
    if token.contains("+r") {
        let caps = RANDOMIZED_RE
            .captures(token)
            .ok_or_else(|| PolicyError::InvalidRandomizedRetryTime(token.to_string()))?;
        let invalid = || PolicyError::InvalidRandomizedRetryTime(token.to_string());
        let base: u64 = caps[1].parse().map_err(|_| invalid())?;
        let spread: u64 = caps[2].parse().map_err(|_| invalid())?;
        let jitter = if spread == 0 {
            0
        } else {
            rng.random_range(0..spread)
        };
        return Ok(base.saturating_add(jitter));
    }
    Err(PolicyError::InvalidRetryTime(token.to_string()))
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn trailing_marker_repeats_second_to_last() {
        let arr = RetryArray::parse(&["5", "10", "-1"]).unwrap();
        assert!(arr.repeats_last());
        assert_eq!(arr.retry_time(0), Some(5));
        assert_eq!(arr.retry_time(1), Some(10));
        assert_eq!(arr.retry_time(2), Some(10));
        assert_eq!(arr.retry_time(50), Some(10));
    }

    #[test]
    fn finite_array_runs_out() {
        let arr = RetryArray::parse(&["4", "8", "16"]).unwrap();
        assert_eq!(arr.retry_time(2), Some(16));
        assert_eq!(arr.retry_time(3), None);
        assert_eq!(arr.retry_time(10), None);
    }

    #[test]
    fn empty_array_has_no_retry_data() {
        let arr = RetryArray::parse::<&str>(&[]).unwrap();
        assert!(arr.is_empty());
        assert_eq!(arr.retry_time(0), None);
    }

    #[test]
    fn marker_after_single_value_is_accepted() {
        let arr = RetryArray::parse(&["5", "-1"]).unwrap();
        assert_eq!(arr.times(), &[5]);
        assert_eq!(arr.retry_time(7), Some(5));
    }

    #[test]
    fn lone_or_leading_marker_is_rejected() {
        assert!(matches!(
            RetryArray::parse(&["-1"]),
            Err(PolicyError::MisplacedInfiniteMarker { index: 0 })
        ));
        assert!(matches!(
            RetryArray::parse(&["-1", "5"]),
            Err(PolicyError::MisplacedInfiniteMarker { index: 0 })
        ));
        assert!(matches!(
            RetryArray::parse(&["1", "-1", "5"]),
            Err(PolicyError::MisplacedInfiniteMarker { index: 1 })
        ));
    }

    #[test]
    fn randomized_token_stays_within_spread() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..32 {
            let arr = RetryArray::parse_with_rng(&["10+r5"], &mut rng).unwrap();
            let value = arr.retry_time(0).unwrap();
            assert!((10..15).contains(&value), "got {value}");
        }
    }

    #[test]
    fn randomized_token_with_zero_spread_is_base() {
        let arr = RetryArray::parse(&["30+r0"]).unwrap();
        assert_eq!(arr.retry_time(0), Some(30));
    }

    #[test]
    fn garbage_tokens_are_rejected() {
        assert!(matches!(
            RetryArray::parse(&["ten"]),
            Err(PolicyError::InvalidRetryTime(_))
        ));
        assert!(matches!(
            RetryArray::parse(&["-5"]),
            Err(PolicyError::InvalidRetryTime(_))
        ));
        assert!(matches!(
            RetryArray::parse(&["5+rx"]),
            Err(PolicyError::InvalidRandomizedRetryTime(_))
        ));
        assert!(matches!(
            RetryArray::parse(&["5+r1+r2"]),
            Err(PolicyError::InvalidRandomizedRetryTime(_))
        ));
    }

    #[test]
    fn tokens_are_trimmed() {
        let arr = RetryArray::parse(&[" 3 ", " -1"]).unwrap();
        assert_eq!(arr.retry_time(4), Some(3));
    }
}
