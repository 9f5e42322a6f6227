//! Layered `.env` loading and validation of `AGENCY_SYNC_*` settings.

use agency_sync::config::{AppConfig, ConfigError, ConfigLoader};
use std::{
    env, fs,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const TEST_KEY_B64: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";

const TOUCHED_KEYS: &[&str] = &[
    "AGENCY_SYNC_PROFILE",
    "AGENCY_SYNC_API_BIND_ADDR",
    "AGENCY_SYNC_LOG_LEVEL",
    "AGENCY_SYNC_CRYPTO_KEY",
    "AGENCY_SYNC_TRIGGER_SECRET",
    "AGENCY_SYNC_DISPATCH_MAX_BATCH_SIZE",
    "AGENCY_SYNC_WEBHOOK_CHANNEL_TTL_SECONDS",
    "AGENCY_SYNC_WEBHOOK_RENEWAL_THRESHOLD_SECONDS",
];

/// Serializes access to the process environment and restores it on drop.
struct EnvScope {
    _lock: MutexGuard<'static, ()>,
    dir: TempDir,
}

impl EnvScope {
    fn new() -> Self {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        let lock = LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        clear();
        Self {
            _lock: lock,
            dir: TempDir::new().unwrap(),
        }
    }

    fn set(&self, pairs: &[(&str, &str)]) -> &Self {
        for (key, value) in pairs {
            unsafe { env::set_var(key, value) };
        }
        self
    }

    fn file(&self, name: &str, contents: &str) -> &Self {
        fs::write(self.dir.path().join(name), contents).unwrap();
        self
    }

    fn load(&self) -> Result<AppConfig, ConfigError> {
        ConfigLoader::with_base_dir(self.dir.path().to_path_buf()).load()
    }
}

impl Drop for EnvScope {
    fn drop(&mut self) {
        clear();
    }
}

fn clear() {
    for key in TOUCHED_KEYS {
        unsafe { env::remove_var(key) };
    }
}

#[test]
fn defaults_apply_without_any_env_files() {
    let scope = EnvScope::new();
    scope.set(&[("AGENCY_SYNC_CRYPTO_KEY", TEST_KEY_B64)]);

    let cfg = scope.load().expect("defaults load");
    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.dispatch.default_batch_size, 10);
    assert_eq!(cfg.dispatch.max_batch_size, 50);
    assert_eq!(cfg.token_refresh.skew_seconds, 120);
    assert_eq!(cfg.webhook.channel_ttl_seconds, 604_800);
    assert_eq!(cfg.webhook.renewal_threshold_seconds, 43_200);
    assert!(cfg.trigger_secret.is_none());
    assert_eq!(cfg.crypto_key.as_ref().map(Vec::len), Some(32));
    assert!(cfg.bind_addr().is_ok());
}

#[test]
fn profile_files_override_base_files() {
    let scope = EnvScope::new();
    scope
        .file(".env", "AGENCY_SYNC_API_BIND_ADDR=127.0.0.1:3000\n")
        .file(
            ".env.local",
            &format!(
                "AGENCY_SYNC_PROFILE=test\nAGENCY_SYNC_API_BIND_ADDR=127.0.0.1:4000\nAGENCY_SYNC_CRYPTO_KEY={TEST_KEY_B64}\n"
            ),
        )
        .file(".env.test", "AGENCY_SYNC_API_BIND_ADDR=192.168.0.10:5000\n")
        .file(".env.test.local", "AGENCY_SYNC_API_BIND_ADDR=10.0.0.5:6000\n");

    let cfg = scope.load().expect("layered files load");
    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
}

#[test]
fn process_env_beats_env_files() {
    let scope = EnvScope::new();
    scope
        .file(
            ".env",
            "AGENCY_SYNC_API_BIND_ADDR=127.0.0.1:3000\nAGENCY_SYNC_TRIGGER_SECRET=from-file\n",
        )
        .set(&[
            ("AGENCY_SYNC_API_BIND_ADDR", "0.0.0.0:9090"),
            ("AGENCY_SYNC_TRIGGER_SECRET", "from-env"),
            ("AGENCY_SYNC_CRYPTO_KEY", TEST_KEY_B64),
        ]);

    let cfg = scope.load().expect("env override loads");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(cfg.trigger_secret.as_deref(), Some("from-env"));
}

#[test]
fn bad_bind_addr_is_reported() {
    let scope = EnvScope::new();
    scope.set(&[
        ("AGENCY_SYNC_API_BIND_ADDR", "not-an-addr"),
        ("AGENCY_SYNC_CRYPTO_KEY", TEST_KEY_B64),
    ]);

    let err = scope.load().unwrap_err();
    assert!(err.to_string().contains("invalid api bind address"));
}

#[test]
fn crypto_key_is_required() {
    let scope = EnvScope::new();
    assert!(matches!(scope.load(), Err(ConfigError::MissingCryptoKey)));
}

#[test]
fn trigger_secret_required_outside_local_and_test() {
    let scope = EnvScope::new();
    scope.set(&[
        ("AGENCY_SYNC_PROFILE", "production"),
        ("AGENCY_SYNC_CRYPTO_KEY", TEST_KEY_B64),
    ]);
    assert!(matches!(scope.load(), Err(ConfigError::MissingTriggerSecret)));

    scope.set(&[("AGENCY_SYNC_TRIGGER_SECRET", "s3cret")]);
    assert_eq!(scope.load().unwrap().profile, "production");
}

#[test]
fn channel_ttl_must_exceed_renewal_threshold() {
    let scope = EnvScope::new();
    scope.set(&[
        ("AGENCY_SYNC_CRYPTO_KEY", TEST_KEY_B64),
        ("AGENCY_SYNC_WEBHOOK_CHANNEL_TTL_SECONDS", "3600"),
        ("AGENCY_SYNC_WEBHOOK_RENEWAL_THRESHOLD_SECONDS", "43200"),
    ]);
    assert!(matches!(
        scope.load(),
        Err(ConfigError::InvalidWebhookTtl { .. })
    ));
}

#[test]
fn unparsable_numbers_name_the_key() {
    let scope = EnvScope::new();
    scope.set(&[
        ("AGENCY_SYNC_CRYPTO_KEY", TEST_KEY_B64),
        ("AGENCY_SYNC_DISPATCH_MAX_BATCH_SIZE", "lots"),
    ]);
    let err = scope.load().unwrap_err();
    assert!(err.to_string().contains("AGENCY_SYNC_DISPATCH_MAX_BATCH_SIZE"));
}
