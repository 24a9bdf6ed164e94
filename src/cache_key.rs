// Keys are computed over UTF-16 code units so they agree with keys written
// by the browser build of the extension.

const CV_PREFIX_UNITS: usize = 500;
const JOB_PREFIX_UNITS: usize = 1000;

/// Cache key for an analysis of `job_text` against `cv_text`.
///
/// Only prefixes of both texts are hashed, so postings that differ in
/// trailing boilerplate still share a key.
pub fn derive_cache_key(cv_text: &str, job_text: &str) -> String {
    let units = cv_text
        .encode_utf16()
        .take(CV_PREFIX_UNITS)
        .chain("||".encode_utf16())
        .chain(job_text.encode_utf16().take(JOB_PREFIX_UNITS));

    format!("analysis_{}", to_base36(rolling_hash(units).unsigned_abs()))
}

/// Short base-36 tag for an arbitrary string, used to seed tracker ids.
pub fn short_hash(s: &str) -> String {
    to_base36(rolling_hash(s.encode_utf16()).unsigned_abs())
}

fn rolling_hash(units: impl Iterator<Item = u16>) -> i32 {
    units.fold(0i32, |hash, unit| {
        hash.wrapping_mul(31).wrapping_add(i32::from(unit))
    })
}

fn to_base36(mut n: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_valid_key(key: &str) -> bool {
        key.strip_prefix("analysis_")
            .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()))
    }

    #[test]
    fn test_empty_inputs_hash_the_separator() {
        // "||" -> 124 * 31 + 124 = 3968 = "328" in base 36
        assert_eq!(derive_cache_key("", ""), "analysis_328");
    }

    #[test]
    fn test_key_is_deterministic() {
        let cv = "Rust engineer with ten years of systems experience";
        let job = "We are hiring a backend engineer";
        assert_eq!(derive_cache_key(cv, job), derive_cache_key(cv, job));
        assert_ne!(derive_cache_key(cv, job), derive_cache_key(cv, "Another posting"));
    }

    #[test]
    fn test_key_format_for_varied_inputs() {
        let inputs = [
            ("", "x"),
            ("ünïcödé 🚀", "職務内容"),
            (&"a".repeat(5000)[..], &"b".repeat(5000)[..]),
            ("\n\t", "   "),
        ];
        for (cv, job) in inputs {
            let key = derive_cache_key(cv, job);
            assert!(is_valid_key(&key), "bad key {key}");
        }
    }

    #[test]
    fn test_only_prefixes_contribute() {
        let cv = "c".repeat(500);
        let job = "j".repeat(1000);
        let base = derive_cache_key(&cv, &job);
        assert_eq!(base, derive_cache_key(&format!("{cv} trailing cv"), &job));
        assert_eq!(base, derive_cache_key(&cv, &format!("{job} footer boilerplate")));
    }

    #[test]
    fn test_to_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(u32::MAX), "1z141z3");
    }

    #[test]
    fn test_min_hash_absolute_value() {
        // |i32::MIN| does not fit in i32; unsigned_abs keeps it positive.
        assert_eq!(to_base36(i32::MIN.unsigned_abs()), "zik0zk");
    }
}
