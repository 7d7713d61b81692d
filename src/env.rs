use std::{cell::RefCell, ffi::OsStr};

use tracing::Level;

/// Name of the variable selecting the log level.
pub const LOG_VAR: &str = "STACKPROC_LOG";

#[derive(Clone, Copy)]
struct Env {
    log_level: Level,
}

thread_local! {
    /// Must only be mutated within `set_env`
    static ENV: RefCell<Option<Env>> = const { RefCell::new(None) };
}

pub fn init() {
    let value = Env {
        log_level: parse_level(var(LOG_VAR).as_deref()),
    };
    set_env(value);
}

/// Maximum level of events written to stderr. Defaults to `warn`.
pub fn log_level() -> Level {
    with_env(|env| env.log_level)
}

fn parse_level(value: Option<&str>) -> Level {
    value
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(Level::WARN)
}

fn set_env(value: Env) {
    ENV.with(|env| {
        let mut env = env.borrow_mut();
        assert!(
            env.is_none(),
            "tried to initialize environment state multiple times"
        );
        *env = Some(value);
    });
}

fn with_env<F, R>(callback: F) -> R
where
    F: Fn(&Env) -> R,
{
    ENV.with(|env| {
        let env = env.borrow();
        let env = env.unwrap_or_else(|| {
            panic!("tried to access environment state before initialization");
        });
        callback(&env)
    })
}

fn var(name: impl AsRef<OsStr>) -> Option<String> {
    std::env::var(name.as_ref()).ok()
}
