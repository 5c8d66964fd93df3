//! hostop CLI
//!
//! Runs a command or uploads a file on the local machine or an SSH target

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use eyre::{WrapErr, eyre};
use hostop_exec::{
    CommandOperator, ConnectionInfo, Credential, ExecError, Remote, execute_local,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "hostop")]
#[command(about = "Run commands and upload files locally or over SSH", long_about = None)]
struct Cli {
    /// Config file (defaults to ./hostop.toml, then the user config dir)
    #[arg(long, global = true, env = "HOSTOP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a shell command and relay its output and exit status
    Exec {
        #[command(flatten)]
        target: TargetArgs,
        /// Command line to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Upload a local file
    Upload {
        #[command(flatten)]
        target: TargetArgs,
        /// Local source file
        src: PathBuf,
        /// Destination path on the target
        dest: String,
        /// Permission bits in octal
        #[arg(long, default_value = "0644", value_parser = parse_mode)]
        mode: u32,
    },
    /// List configured targets
    Targets,
}

#[derive(Args)]
struct TargetArgs {
    /// Operate on this machine
    #[arg(long, conflicts_with_all = ["target", "host", "password", "key"])]
    local: bool,

    /// Named target from the config file
    #[arg(long, short = 't', conflicts_with_all = ["host", "password", "key"])]
    target: Option<String>,

    /// Remote host
    #[arg(long, short = 'H')]
    host: Option<String>,

    #[arg(long, short = 'p', default_value_t = 22)]
    port: u16,

    #[arg(long, short = 'u', default_value = "root")]
    user: String,

    /// Authenticate with a password
    #[arg(long, env = "HOSTOP_PASSWORD", hide_env_values = true, conflicts_with = "key")]
    password: Option<String>,

    /// Authenticate with a private key (agent is used when neither is given)
    #[arg(long, short = 'i')]
    key: Option<PathBuf>,

    /// Give up after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
}

/// Where the work runs
enum Plan {
    Local,
    Remote(ConnectionInfo, Credential),
}

impl TargetArgs {
    fn plan(&self, config: &Config) -> Result<Plan> {
        if self.local {
            return Ok(Plan::Local);
        }

        if let Some(name) = &self.target {
            let target = config
                .find(name)
                .ok_or_else(|| eyre!("unknown target `{name}`"))?;
            return Ok(Plan::Remote(target.connection_info(), target.auth.clone()));
        }

        let host = self
            .host
            .clone()
            .ok_or_else(|| eyre!("one of --local, --target or --host is required"))?;

        let credential = match (&self.password, &self.key) {
            (Some(password), _) => Credential::Password {
                password: password.clone(),
            },
            (None, Some(path)) => Credential::PrivateKey { path: path.clone() },
            (None, None) => Credential::Agent,
        };

        Ok(Plan::Remote(
            ConnectionInfo::new(host, &self.user).with_port(self.port),
            credential,
        ))
    }

    fn deadline(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_secs)
    }
}

/// Run `callback` on the planned operator, within an optional deadline
async fn run<T, F>(plan: &Plan, deadline: Option<Duration>, callback: F) -> Result<T, ExecError>
where
    F: AsyncFnOnce(&dyn CommandOperator) -> Result<T, ExecError>,
{
    let work = async {
        match plan {
            Plan::Local => execute_local(callback).await,
            Plan::Remote(info, credential) => {
                debug!(address = %info.address(), ?credential, "running remotely");
                Remote::new().with_credential(info, credential, callback).await
            }
        }
    };

    match deadline {
        None => work.await,
        Some(timeout) => tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| ExecError::Timeout { timeout })?,
    }
}

fn parse_mode(value: &str) -> Result<u32, String> {
    let digits = value.strip_prefix("0o").unwrap_or(value);
    match u32::from_str_radix(digits, 8) {
        Ok(mode) if mode <= 0o7777 => Ok(mode),
        _ => Err(format!("`{value}` is not an octal permission mode")),
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn credential_method(credential: &Credential) -> &'static str {
    match credential {
        Credential::Password { .. } => "password",
        Credential::PrivateKey { .. } => "private_key",
        Credential::Agent => "agent",
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    init_tracing(cli.log_level.as_deref().unwrap_or(&config.log_level));

    match cli.command {
        Commands::Exec { target, command } => {
            let plan = target.plan(&config)?;
            let command_line = command.join(" ");

            let result = run(&plan, target.deadline(), async |op| {
                op.execute(&command_line).await
            })
            .await
            .wrap_err_with(|| format!("failed to run `{command_line}`"))?;

            std::io::stdout().write_all(&result.stdout)?;
            std::io::stderr().write_all(&result.stderr)?;
            std::io::stdout().flush()?;

            Ok(ExitCode::from(u8::try_from(result.status).unwrap_or(1)))
        }
        Commands::Upload {
            target,
            src,
            dest,
            mode,
        } => {
            let plan = target.plan(&config)?;

            run(&plan, target.deadline(), async |op| {
                op.upload_file(&src, &dest, mode).await
            })
            .await
            .wrap_err_with(|| format!("failed to upload {} to {dest}", src.display()))?;

            println!("uploaded {} -> {dest} ({mode:o})", src.display());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Targets => {
            for target in &config.target {
                println!(
                    "{}\t{}@{}\t{}",
                    target.name,
                    target.user,
                    target.connection_info().address(),
                    credential_method(&target.auth)
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode() {
        assert_eq!(parse_mode("0755"), Ok(0o755));
        assert_eq!(parse_mode("644"), Ok(0o644));
        assert_eq!(parse_mode("0o600"), Ok(0o600));
        assert!(parse_mode("0999").is_err());
        assert!(parse_mode("17777").is_err());
    }

    #[test]
    fn test_cli_rejects_password_with_key() {
        let parsed = Cli::try_parse_from([
            "hostop", "exec", "--host", "web", "--password", "pw", "--key", "id", "--", "true",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_cli_rejects_credentials_with_named_target() {
        for flag in [["--key", "~/.ssh/other"], ["--password", "pw"]] {
            let mut args = vec!["hostop", "exec", "--target", "web"];
            args.extend(flag);
            args.extend(["--", "uptime"]);
            assert!(Cli::try_parse_from(args).is_err(), "{flag:?} accepted with --target");
        }
    }

    #[test]
    fn test_cli_rejects_credentials_with_local() {
        for flag in [["--password", "pw"], ["--key", "id"]] {
            let mut args = vec!["hostop", "exec", "--local"];
            args.extend(flag);
            args.extend(["--", "ls"]);
            assert!(Cli::try_parse_from(args).is_err(), "{flag:?} accepted with --local");
        }
    }

    #[test]
    fn test_plan_defaults_to_agent() {
        let cli = Cli::try_parse_from(["hostop", "exec", "-H", "web", "-p", "2222", "uptime"]).unwrap();
        let Commands::Exec { target, command } = cli.command else {
            panic!("expected exec");
        };

        assert_eq!(command, ["uptime"]);
        match target.plan(&Config::default()).unwrap() {
            Plan::Remote(info, credential) => {
                assert_eq!(info.address(), "web:2222");
                assert_eq!(credential, Credential::Agent);
            }
            Plan::Local => panic!("expected remote plan"),
        }
    }

    #[test]
    fn test_plan_requires_a_target() {
        let cli = Cli::try_parse_from(["hostop", "exec", "uptime"]).unwrap();
        let Commands::Exec { target, .. } = cli.command else {
            panic!("expected exec");
        };

        assert!(target.plan(&Config::default()).is_err());
    }

    #[tokio::test]
    async fn test_local_plan_runs_command() {
        let result = run(&Plan::Local, Some(Duration::from_secs(10)), async |op| {
            op.execute("echo hi").await
        })
        .await
        .unwrap();

        assert_eq!(result.stdout, b"hi\n");
    }

    #[tokio::test]
    async fn test_deadline_is_enforced() {
        let err = run(&Plan::Local, Some(Duration::from_millis(100)), async |op| {
            op.execute("sleep 5").await
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ExecError::Timeout { .. }));
    }
}
