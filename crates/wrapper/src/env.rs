//! Wrapper-daemon environment contract: recognized variables
//! propagated from the cron environment, or embedded `VAR=value`
//! prefixes the caller has already exported before invoking `crabsh`.

use crab_core::env_truthy;

#[derive(Debug, Clone)]
pub struct WrapperEnv {
    pub host: String,
    pub crabid: Option<String>,
    /// Shell used to run the wrapped command; defaults to `sh`.
    pub crabshell: String,
    pub pidfile: Option<String>,
    /// If truthy, bypass reporting to the daemon entirely and just run
    /// the command.
    pub ignore: bool,
    /// If truthy, echo captured stdout/stderr to this process's stdout
    /// in addition to reporting it to the daemon.
    pub echo: bool,
}

impl WrapperEnv {
    pub fn from_process_env() -> Self {
        Self {
            host: local_hostname(),
            crabid: non_empty(std::env::var("CRABID").ok()),
            crabshell: std::env::var("CRABSHELL").ok().filter(|s| !s.is_empty()).unwrap_or_else(|| "sh".into()),
            pidfile: non_empty(std::env::var("CRABPIDFILE").ok()),
            ignore: truthy_env("CRABIGNORE"),
            echo: truthy_env("CRABECHO"),
        }
    }
}

fn truthy_env(name: &str) -> bool {
    std::env::var(name).map(|v| env_truthy(&v)).unwrap_or(false)
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.is_empty())
}

fn local_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_crabid_is_none() {
        std::env::set_var("CRABID", "");
        let env = WrapperEnv::from_process_env();
        assert_eq!(env.crabid, None);
        std::env::remove_var("CRABID");
    }

    #[test]
    fn crabshell_defaults_to_sh() {
        std::env::remove_var("CRABSHELL");
        let env = WrapperEnv::from_process_env();
        assert_eq!(env.crabshell, "sh");
    }

    #[test]
    fn truthy_values_recognized_case_insensitively() {
        std::env::set_var("CRABECHO", "On");
        let env = WrapperEnv::from_process_env();
        assert!(env.echo);
        std::env::remove_var("CRABECHO");
    }
}
