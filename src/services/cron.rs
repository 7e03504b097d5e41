use crate::types::models::CronPreset;

pub const CRON_FIELDS: usize = 5;

pub const CRON_PRESETS: &[CronPreset] = &[
    CronPreset {
        label: "Every 15 minutes",
        schedule: "*/15 * * * *",
    },
    CronPreset {
        label: "Every 30 minutes",
        schedule: "*/30 * * * *",
    },
    CronPreset {
        label: "Every hour",
        schedule: "0 * * * *",
    },
    CronPreset {
        label: "Every 2 hours",
        schedule: "0 */2 * * *",
    },
    CronPreset {
        label: "Every 4 hours",
        schedule: "0 */4 * * *",
    },
    CronPreset {
        label: "Every 6 hours",
        schedule: "0 */6 * * *",
    },
    CronPreset {
        label: "Every 12 hours",
        schedule: "0 */12 * * *",
    },
    CronPreset {
        label: "Daily at midnight UTC",
        schedule: "0 0 * * *",
    },
    CronPreset {
        label: "Weekly on Monday",
        schedule: "0 0 * * 1",
    },
];

/// Only the field count is checked; field contents are left to the scheduler.
pub fn validate_cron(expression: &str) -> Result<String, String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != CRON_FIELDS {
        return Err(format!(
            "Cron expression must have exactly {} fields, got {}: {:?}",
            CRON_FIELDS,
            fields.len(),
            expression
        ));
    }
    Ok(fields.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_fields_are_accepted_and_normalized() {
        assert_eq!(validate_cron("*/15 * * * *").unwrap(), "*/15 * * * *");
        assert_eq!(validate_cron("  0   */4 * *\t*  ").unwrap(), "0 */4 * * *");
    }

    #[test]
    fn other_field_counts_are_rejected() {
        assert!(validate_cron("*/15 * * *").is_err());
        assert!(validate_cron("0 0 * * * *").is_err());
        assert!(validate_cron("").is_err());
    }

    #[test]
    fn presets_are_all_valid() {
        for preset in CRON_PRESETS {
            assert!(validate_cron(preset.schedule).is_ok(), "{}", preset.label);
        }
    }
}
