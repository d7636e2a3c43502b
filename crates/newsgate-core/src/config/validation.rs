//! Source configuration validation.
//!
//! Collects *all* violations rather than failing on the first, mirroring
//! the teacher's `config::validate()` → `Vec<ConfigError>` convention, so
//! `newsgate config test` can report every problem in one pass.

use super::{SourceConfig, SourceParams};
use crate::error::ConfigError;

/// Validate a single merged source configuration, returning `Ok(())` when
/// clean or the single first-encountered violation as an `Err` (used at
/// load time, where the loader aborts the whole run on any config error per
/// §7's `ConfigError` propagation rule).
pub fn validate_source(source: &SourceConfig) -> Result<(), ConfigError> {
    for err in validate_source_all(source) {
        return Err(err);
    }
    Ok(())
}

/// Validate a single source, returning every violation found (used by the
/// `config test` diagnostic command, which reports all problems at once).
pub fn validate_source_all(source: &SourceConfig) -> Vec<ConfigError> {
    let mut errors = Vec::new();

    if source.id.trim().is_empty() {
        errors.push(ConfigError::MissingField {
            field: "id".to_string(),
        });
    }

    match &source.source_params {
        SourceParams::Youtube(p) => {
            if p.channel_id.trim().is_empty() {
                errors.push(ConfigError::MissingField {
                    field: format!("{}.source_params.channel_id", source.id),
                });
            } else if !p.channel_id.starts_with("UC") {
                errors.push(ConfigError::InvalidValue {
                    field: format!("{}.source_params.channel_id", source.id),
                    message: "must be an explicit UC… channel id; handle-to-id resolution is unsupported".to_string(),
                });
            }
        }
        SourceParams::Rss(p) => {
            if p.feed_url.trim().is_empty() {
                errors.push(ConfigError::MissingField {
                    field: format!("{}.source_params.feed_url", source.id),
                });
            }
        }
        SourceParams::Bluesky(p) => {
            let has_profile = !p.actor.trim().is_empty();
            let has_feed = p.feed_url.is_some() || (p.creator.is_some() && p.rkey.is_some());
            if !has_profile && !has_feed {
                errors.push(ConfigError::InvalidValue {
                    field: format!("{}.source_params", source.id),
                    message: "must set either actor (profile mode) or feed_url/(creator,rkey) (custom-feed mode)".to_string(),
                });
            }
        }
        SourceParams::Twitter(p) => {
            if p.handle.trim().is_empty() {
                errors.push(ConfigError::MissingField {
                    field: format!("{}.source_params.handle", source.id),
                });
            }
        }
    }

    if source.formatting.max_length == 0 {
        errors.push(ConfigError::InvalidValue {
            field: format!("{}.formatting.max_length", source.id),
            message: "must be greater than zero".to_string(),
        });
    }

    for hour in &source.scheduling.skip_hours {
        if *hour > 23 {
            errors.push(ConfigError::InvalidValue {
                field: format!("{}.scheduling.skip_hours", source.id),
                message: format!("hour {hour} out of range 0-23"),
            });
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        FilteringConfig, FormattingConfig, MentionsConfig, ProcessingConfig, SchedulingConfig,
        TargetAccount, YoutubeParams,
    };

    fn source_with(params: SourceParams) -> SourceConfig {
        SourceConfig {
            id: "src".into(),
            enabled: true,
            priority: crate::config::Priority::Normal,
            source_params: params,
            target_account: TargetAccount::default(),
            formatting: FormattingConfig::default(),
            filtering: FilteringConfig::default(),
            processing: ProcessingConfig::default(),
            mentions: MentionsConfig::default(),
            profile_sync: None,
            scheduling: SchedulingConfig::default(),
        }
    }

    #[test]
    fn youtube_requires_explicit_uc_channel_id() {
        let source = source_with(SourceParams::Youtube(YoutubeParams {
            channel_id: String::new(),
            exclude_shorts: false,
        }));
        let errors = validate_source_all(&source);
        assert!(!errors.is_empty());
    }

    #[test]
    fn youtube_rejects_non_uc_channel_id() {
        let source = source_with(SourceParams::Youtube(YoutubeParams {
            channel_id: "@somehandle".into(),
            exclude_shorts: false,
        }));
        let errors = validate_source_all(&source);
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn youtube_accepts_explicit_uc_id() {
        let source = source_with(SourceParams::Youtube(YoutubeParams {
            channel_id: "UCabc123".into(),
            exclude_shorts: true,
        }));
        assert!(validate_source_all(&source).is_empty());
    }

    #[test]
    fn skip_hours_out_of_range_flagged() {
        let mut source = source_with(SourceParams::Twitter(super::super::TwitterParams {
            handle: "foo".into(),
        }));
        source.scheduling.skip_hours = vec![5, 30];
        let errors = validate_source_all(&source);
        assert_eq!(errors.len(), 1);
    }
}
