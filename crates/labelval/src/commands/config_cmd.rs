//! Config subcommand handlers.

use dialoguer::Password;

use labelval_config::{Config, Profile};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

/// Copy of `cfg` safe to print.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.password.is_some() {
            profile.password = Some(REDACTED.into());
        }
    }
    cfg
}

fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            let mut out = config::config_path().display().to_string();
            if global.verbose > 0 {
                if let Some(dir) = config::vendor_data_dir() {
                    out.push_str(&format!("\ndata: {}", dir.display()));
                }
            }
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = redacted(&labelval_config::load_config()?);
            let out = output::render_single(
                &global.output,
                &cfg,
                |c| toml::to_string_pretty(c).unwrap_or_default(),
                |c| {
                    let mut names: Vec<_> = c.profiles.keys().cloned().collect();
                    names.sort();
                    names.join("\n")
                },
            );
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::AddProfile {
            name,
            host,
            node_number,
            username,
            default,
        } => {
            let mut cfg = labelval_config::load_config()?;
            let profile = Profile {
                node_number,
                username,
                ..Profile::new(host)
            };
            // Validate before writing anything.
            labelval_config::profile_endpoint(&profile, &labelval_config::PlatformDiscovery::default())
                .node_base()
                .map_err(|e| CliError::Validation {
                    field: "host".into(),
                    reason: e.to_string(),
                })?;

            let first = cfg.profiles.is_empty();
            cfg.profiles.insert(name.clone(), profile);
            if default || first {
                cfg.default_profile = Some(name.clone());
            }
            labelval_config::save_config(&cfg)?;
            output::print_output(&format!("saved profile {name}"), global.quiet);
            Ok(())
        }

        ConfigCommand::SetPassword => {
            let cfg = config::load_config_or_default();
            let profile = config::active_profile_name(global, &cfg);
            let password = match global.password {
                Some(ref pw) => pw.clone(),
                None => Password::new()
                    .with_prompt(format!("Password for profile '{profile}'"))
                    .interact()
                    .map_err(prompt_err)?,
            };
            if password.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "must not be empty".into(),
                });
            }
            labelval_config::store_password(&profile, &password)?;
            output::print_output(&format!("password stored for {profile}"), global.quiet);
            Ok(())
        }
    }
}
