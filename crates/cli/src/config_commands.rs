use std::path::{Path, PathBuf};

use {
    anyhow::Result,
    clap::{Subcommand, ValueEnum},
    palaver_config::{PalaverConfig, Severity, ValidationResult, validate},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the effective configuration and report errors/warnings.
    Check,
    /// Print the effective configuration after env overrides.
    Show {
        #[arg(long, value_enum, default_value_t = Format::Toml)]
        format: Format,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Toml,
    Json,
}

/// Load the config from `path`, or from the standard locations, then apply
/// `PALAVER_*` overrides.
pub fn load(path: Option<&Path>) -> Result<PalaverConfig> {
    let config = match path {
        Some(path) => palaver_config::load_config(path)?,
        None => palaver_config::discover_and_load(),
    };
    Ok(palaver_config::apply_env_overrides(config)?)
}

pub fn handle_config(
    action: ConfigAction,
    config: &PalaverConfig,
    explicit: Option<&Path>,
) -> Result<()> {
    match action {
        ConfigAction::Check => check(config, explicit),
        ConfigAction::Show { format } => {
            println!("{}", render(config, format)?);
            Ok(())
        },
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(config: &PalaverConfig, explicit: Option<&Path>) -> Result<()> {
    let source: Option<PathBuf> = explicit
        .map(Path::to_path_buf)
        .or_else(palaver_config::loader::find_config_file);
    match source {
        Some(path) => eprintln!("Checking {}\n", path.display()),
        None => eprintln!("No config file found; checking defaults.\n"),
    }

    let result = validate(config);
    for line in report_lines(&result) {
        eprintln!("{line}");
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if !result.diagnostics.is_empty() {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        std::process::exit(1);
    }

    Ok(())
}

fn report_lines(result: &ValidationResult) -> Vec<String> {
    result
        .diagnostics
        .iter()
        .map(|d| {
            let color = match d.severity {
                Severity::Error => RED,
                Severity::Warning => YELLOW,
            };
            format!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message)
        })
        .collect()
}

fn render(config: &PalaverConfig, format: Format) -> Result<String> {
    Ok(match format {
        Format::Toml => toml::to_string_pretty(config)?,
        Format::Json => serde_json::to_string_pretty(config)?,
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::io::Write};

    #[test]
    fn load_reads_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[scheduler]\ntick_interval_ms = 250\nautostart = false").unwrap();

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.scheduler.tick_interval_ms, 250);
        assert!(!config.scheduler.autostart);
        assert_eq!(config.events.capacity, 256);
    }

    #[test]
    fn load_reports_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("palaver.toml"))).is_err());
    }

    #[test]
    fn render_round_trips_through_both_formats() {
        let mut config = PalaverConfig::default();
        config.scheduler.min_delivery_interval_ms = Some(1_500);

        let toml_text = render(&config, Format::Toml).unwrap();
        assert!(toml_text.contains("min_delivery_interval_ms = 1500"));
        let back: PalaverConfig = toml::from_str(&toml_text).unwrap();
        assert_eq!(back, config);

        let json_text = render(&config, Format::Json).unwrap();
        let back: PalaverConfig = serde_json::from_str(&json_text).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn report_lines_label_each_diagnostic() {
        let mut config = PalaverConfig::default();
        config.scheduler.tick_interval_ms = 0;
        let lines = report_lines(&validate(&config));
        assert!(
            lines
                .iter()
                .any(|l| l.contains("error") && l.contains("scheduler.tick_interval_ms"))
        );
    }
}
