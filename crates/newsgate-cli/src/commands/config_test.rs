//! Implementation of the `newsgate config test` command: validates the
//! global config and every loaded source, reporting every violation found
//! rather than stopping at the first.

use newsgate_core::config::{validate_source_all, GlobalConfig, SourceConfig};

use super::ConfigArgs;

/// Execute the `newsgate config test` command.
///
/// Returns without error even when validation fails; the caller decides
/// the process exit code from the returned pass/fail flag.
pub async fn execute(_global: &GlobalConfig, sources: &[SourceConfig], _args: ConfigArgs) -> anyhow::Result<bool> {
    eprintln!();
    let mut all_passed = true;

    if sources.is_empty() {
        eprintln!("no sources configured under config/sources/");
    }

    for source in sources {
        let errors = validate_source_all(source);
        if errors.is_empty() {
            eprintln!("{:<24}OK", format!("{}:", source.id));
        } else {
            all_passed = false;
            eprintln!("{:<24}FAIL", format!("{}:", source.id));
            for err in &errors {
                eprintln!("  - {err}");
            }
        }
    }

    eprintln!();
    if all_passed {
        eprintln!("All checks passed.");
    } else {
        eprintln!("Some sources failed validation.");
    }

    Ok(all_passed)
}
