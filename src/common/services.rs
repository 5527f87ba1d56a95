/*
 * This file is part of the Tanoda LMS.
 *
 * Copyright (C) 2025 Kovács Dávid <kapcsolat@kovacsdavid.dev>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */
use rand::Rng;
use rand::RngExt;
use rand::distr::Alphanumeric;
use std::time::Duration;

/// Generates a random alphanumeric string of the requested length from the
/// thread-local CSPRNG. Used for generated tenant database credentials.
pub fn generate_string_csprng(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generates a hex encoded random token of `len` bytes of entropy from the
/// thread-local CSPRNG. Setup tokens use 32 bytes (256 bits).
pub fn generate_hex_token_csprng(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill(bytes.as_mut_slice());
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Computes the delay before the next retry attempt.
///
/// The delay grows as `base * 2^attempts` with a +/-25% jitter so that
/// retrying tasks do not stampede a recovering dependency, and is clamped
/// to `cap`.
pub fn backoff_with_jitter(base: Duration, attempts: u32, cap: Duration) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempts));
    let exp = exp.min(cap);
    let jitter_span = exp.as_millis() as u64 / 4;
    if jitter_span == 0 {
        return exp;
    }
    let jitter = rand::rng().random_range(0..=jitter_span * 2) as i64 - jitter_span as i64;
    let millis = (exp.as_millis() as i64 + jitter).max(1) as u64;
    Duration::from_millis(millis).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn csprng_string_has_requested_length() {
        assert_eq!(generate_string_csprng(40).len(), 40);
        assert_ne!(generate_string_csprng(40), generate_string_csprng(40));
    }

    #[test]
    fn hex_token_is_hex_and_double_length() {
        let token = generate_hex_token_csprng(32);
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn backoff_grows_and_respects_cap() {
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(30);
        let first = backoff_with_jitter(base, 1, cap);
        assert!(first >= Duration::from_millis(750));
        assert!(first <= Duration::from_millis(1250));
        let capped = backoff_with_jitter(base, 20, cap);
        assert!(capped <= cap);
    }
}
