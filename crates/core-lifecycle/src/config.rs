//! Start-up options handed to the native client.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Client executable.
    pub program: PathBuf,
    /// Arguments placed before the generated flags (e.g. a subcommand).
    pub extra_args: Vec<String>,
    /// Service state directory; the CA certificate is written here.
    pub repo_dir: PathBuf,
    /// Proxy listen address, also used to probe liveness.
    pub listen_on_tcp: String,
    pub cache_type: Option<String>,
    pub cache_http_public_key: Option<String>,
    pub injector_credentials: Option<String>,
    pub injector_tls_cert_file: Option<PathBuf>,
    pub tls_ca_cert_store_path: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ouinet-client"),
            extra_args: Vec::new(),
            repo_dir: PathBuf::from("ouinet-repo"),
            listen_on_tcp: String::from("127.0.0.1:8077"),
            cache_type: Some(String::from("bep5-http")),
            cache_http_public_key: None,
            injector_credentials: None,
            injector_tls_cert_file: None,
            tls_ca_cert_store_path: None,
        }
    }
}

// Credentials stay out of logs.
impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("program", &self.program)
            .field("extra_args", &self.extra_args)
            .field("repo_dir", &self.repo_dir)
            .field("listen_on_tcp", &self.listen_on_tcp)
            .field("cache_type", &self.cache_type)
            .field("injector_credentials", &self.injector_credentials.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl ServiceConfig {
    /// Full argument vector for the client process.
    pub fn args(&self) -> Vec<String> {
        let mut args = self.extra_args.clone();
        args.push(format!("--repo={}", self.repo_dir.display()));
        args.push(format!("--listen-on-tcp={}", self.listen_on_tcp));
        if let Some(v) = &self.cache_type {
            args.push(format!("--cache-type={v}"));
        }
        if let Some(v) = &self.cache_http_public_key {
            args.push(format!("--cache-http-public-key={v}"));
        }
        if let Some(v) = &self.injector_credentials {
            args.push(format!("--injector-credentials={v}"));
        }
        if let Some(v) = &self.injector_tls_cert_file {
            args.push(format!("--injector-tls-cert-file={}", v.display()));
        }
        if let Some(v) = &self.tls_ca_cert_store_path {
            args.push(format!("--tls-ca-cert-store-path={}", v.display()));
        }
        args
    }
}
