//! Environment-driven configuration, resolved once at startup and threaded
//! into the router. No process-wide globals.

use anyhow::{Context, Result, bail};
use axum::http::Method;
use deployd_pipeline::PipelineConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct DeploydConfig {
    pub addr: SocketAddr,
    /// Pre-shared HMAC secret. `None` disables signature verification and
    /// trusts every well-formed request on the hook path; only acceptable on
    /// a trusted network, never in a production deployment.
    pub secret: Option<String>,
    pub hook_path: String,
    pub hook_method: Method,
    pub pipeline: PipelineConfig,
}

impl DeploydConfig {
    pub fn from_env() -> Result<Self> {
        let addr: SocketAddr = std::env::var("DEPLOYD_BIND")
            .unwrap_or_else(|_| "0.0.0.0:3002".into())
            .parse()
            .context("invalid DEPLOYD_BIND address")?;

        let secret = std::env::var("DEPLOYD_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        let hook_path =
            std::env::var("DEPLOYD_HOOK_PATH").unwrap_or_else(|_| "/github-webhook".into());
        if !hook_path.starts_with('/') {
            bail!("DEPLOYD_HOOK_PATH must start with '/'");
        }

        let hook_method: Method = std::env::var("DEPLOYD_HOOK_METHOD")
            .unwrap_or_else(|_| "POST".into())
            .to_uppercase()
            .parse()
            .context("invalid DEPLOYD_HOOK_METHOD")?;

        let repo_dir =
            PathBuf::from(std::env::var("DEPLOYD_REPO_DIR").unwrap_or_else(|_| ".".into()));

        let timeout = match std::env::var("DEPLOYD_PIPELINE_TIMEOUT_SECS") {
            Ok(raw) => {
                let secs: u64 = raw
                    .parse()
                    .context("invalid DEPLOYD_PIPELINE_TIMEOUT_SECS")?;
                Some(Duration::from_secs(secs))
            }
            Err(_) => None,
        };

        let pipeline = PipelineConfig {
            repo_dir,
            fetch: command_from_env("DEPLOYD_FETCH_CMD", "git pull")?,
            install: command_from_env("DEPLOYD_INSTALL_CMD", "npm install")?,
            stop: command_from_env("DEPLOYD_STOP_CMD", "pkill -f vite")?,
            start: command_from_env("DEPLOYD_START_CMD", "npm run dev")?,
            timeout,
        };

        Ok(Self {
            addr,
            secret,
            hook_path,
            hook_method,
            pipeline,
        })
    }
}

/// Commands are whitespace-split into argv vectors and executed without a
/// shell, so no quoting or operators.
fn command_from_env(var: &str, default: &str) -> Result<Vec<String>> {
    let raw = std::env::var(var).unwrap_or_else(|_| default.to_string());
    let argv: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    if argv.is_empty() {
        bail!("{var} must name a command");
    }
    Ok(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const VARS: &[&str] = &[
        "DEPLOYD_BIND",
        "DEPLOYD_SECRET",
        "DEPLOYD_HOOK_PATH",
        "DEPLOYD_HOOK_METHOD",
        "DEPLOYD_REPO_DIR",
        "DEPLOYD_FETCH_CMD",
        "DEPLOYD_INSTALL_CMD",
        "DEPLOYD_STOP_CMD",
        "DEPLOYD_START_CMD",
        "DEPLOYD_PIPELINE_TIMEOUT_SECS",
    ];

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_env() {
        for var in VARS {
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn defaults_are_applied() {
        let _guard = env_lock().lock().unwrap();
        clear_env();

        let cfg = DeploydConfig::from_env().expect("load config");
        assert_eq!(cfg.addr, "0.0.0.0:3002".parse().unwrap());
        assert!(cfg.secret.is_none());
        assert_eq!(cfg.hook_path, "/github-webhook");
        assert_eq!(cfg.hook_method, Method::POST);
        assert_eq!(cfg.pipeline.fetch, ["git", "pull"]);
        assert_eq!(cfg.pipeline.install, ["npm", "install"]);
        assert_eq!(cfg.pipeline.stop, ["pkill", "-f", "vite"]);
        assert_eq!(cfg.pipeline.start, ["npm", "run", "dev"]);
        assert!(cfg.pipeline.timeout.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let _guard = env_lock().lock().unwrap();
        clear_env();
        unsafe {
            std::env::set_var("DEPLOYD_BIND", "127.0.0.1:9999");
            std::env::set_var("DEPLOYD_SECRET", "hunter2");
            std::env::set_var("DEPLOYD_HOOK_PATH", "/hooks/push");
            std::env::set_var("DEPLOYD_HOOK_METHOD", "put");
            std::env::set_var("DEPLOYD_REPO_DIR", "/srv/dashboard");
            std::env::set_var("DEPLOYD_FETCH_CMD", "git fetch --all");
            std::env::set_var("DEPLOYD_PIPELINE_TIMEOUT_SECS", "90");
        }

        let cfg = DeploydConfig::from_env().expect("load config");
        assert_eq!(cfg.addr, "127.0.0.1:9999".parse().unwrap());
        assert_eq!(cfg.secret.as_deref(), Some("hunter2"));
        assert_eq!(cfg.hook_path, "/hooks/push");
        assert_eq!(cfg.hook_method, Method::PUT);
        assert_eq!(cfg.pipeline.repo_dir, PathBuf::from("/srv/dashboard"));
        assert_eq!(cfg.pipeline.fetch, ["git", "fetch", "--all"]);
        assert_eq!(cfg.pipeline.timeout, Some(Duration::from_secs(90)));

        clear_env();
    }

    #[test]
    fn empty_secret_disables_verification() {
        let _guard = env_lock().lock().unwrap();
        clear_env();
        unsafe { std::env::set_var("DEPLOYD_SECRET", "") };

        let cfg = DeploydConfig::from_env().expect("load config");
        assert!(cfg.secret.is_none());

        clear_env();
    }

    #[test]
    fn relative_hook_path_is_rejected() {
        let _guard = env_lock().lock().unwrap();
        clear_env();
        unsafe { std::env::set_var("DEPLOYD_HOOK_PATH", "github-webhook") };

        assert!(DeploydConfig::from_env().is_err());

        clear_env();
    }

    #[test]
    fn blank_command_is_rejected() {
        let _guard = env_lock().lock().unwrap();
        clear_env();
        unsafe { std::env::set_var("DEPLOYD_FETCH_CMD", "   ") };

        assert!(DeploydConfig::from_env().is_err());

        clear_env();
    }
}
