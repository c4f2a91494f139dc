/// Resolved keep-counts passed to a backend's retention operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_daily: u32,
    pub keep_weekly: u32,
    pub keep_monthly: u32,
}

const DEFAULT_POLICY: RetentionPolicy = RetentionPolicy {
    keep_daily: 7,
    keep_weekly: 4,
    keep_monthly: 6,
};

impl Default for RetentionPolicy {
    fn default() -> Self {
        DEFAULT_POLICY
    }
}

/// Parses a `"Nd:Nw:Nm"` retention string. Up to three colon-separated
/// fields, each an integer with an informational trailing unit letter
/// (position, not suffix, determines daily/weekly/monthly). Missing fields
/// default to 0. The empty string, or an all-zero result, falls back to
/// `{7,4,6}`.
pub fn parse(input: &str) -> RetentionPolicy {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return DEFAULT_POLICY;
    }

    let mut fields = trimmed.split(':');
    let keep_daily = fields.next().map(parse_field).unwrap_or(0);
    let keep_weekly = fields.next().map(parse_field).unwrap_or(0);
    let keep_monthly = fields.next().map(parse_field).unwrap_or(0);

    if keep_daily == 0 && keep_weekly == 0 && keep_monthly == 0 {
        return DEFAULT_POLICY;
    }

    RetentionPolicy {
        keep_daily,
        keep_weekly,
        keep_monthly,
    }
}

fn parse_field(field: &str) -> u32 {
    let digits: String = field.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_all_zero_fall_back_to_defaults() {
        assert_eq!(parse(""), DEFAULT_POLICY);
        assert_eq!(parse("0:0:0"), DEFAULT_POLICY);
        assert_eq!(parse("0d:0w:0m"), DEFAULT_POLICY);
    }

    #[test]
    fn non_zero_round_trips() {
        assert_eq!(
            parse("3d:2w:5m"),
            RetentionPolicy {
                keep_daily: 3,
                keep_weekly: 2,
                keep_monthly: 5,
            }
        );
    }

    #[test]
    fn missing_trailing_fields_default_to_zero() {
        assert_eq!(
            parse("5d"),
            RetentionPolicy {
                keep_daily: 5,
                keep_weekly: 0,
                keep_monthly: 0,
            }
        );
    }

    #[test]
    fn suffix_is_purely_informational() {
        // position determines dimension, not the letter
        assert_eq!(
            parse("3w:2d:5y"),
            RetentionPolicy {
                keep_daily: 3,
                keep_weekly: 2,
                keep_monthly: 5,
            }
        );
    }
}
