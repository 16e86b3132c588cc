//! Browser process supervision.
//!
//! Launches a local Chromium-family browser with remote debugging on an
//! ephemeral port and a throwaway profile, then polls the debugging
//! endpoint until it hands out a control-channel URL. The handle owns the
//! process; releasing it (or dropping it) terminates the browser.

use async_trait::async_trait;
use formpilot_core::config::BrowserConfig;
use formpilot_core::{Error, Paths, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// How long and how often to poll a starting browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for AttachPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 20,
        }
    }
}

impl AttachPolicy {
    pub fn from_config(config: &BrowserConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.poll_interval_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }
}

/// Result of one poll of `/json/version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Browser is up; carries `webSocketDebuggerUrl`.
    Ready(String),
    /// Nothing listening yet.
    Refused,
    /// Something answered, but not with 200 (proxy, gateway, ...).
    Unexpected(String),
    /// 200 without a usable debugger URL.
    Malformed(String),
}

#[async_trait]
pub trait DebugEndpoint: Send + Sync {
    /// Poll `{base_url}/json/version` once.
    async fn probe(&self, base_url: &str) -> ProbeOutcome;
}

/// Probes the real endpoint over HTTP, bypassing any configured proxy.
pub struct HttpDebugEndpoint {
    client: reqwest::Client,
}

impl HttpDebugEndpoint {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }
}

impl Default for HttpDebugEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DebugEndpoint for HttpDebugEndpoint {
    async fn probe(&self, base_url: &str) -> ProbeOutcome {
        let url = format!("{}/json/version", base_url);
        let resp = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) if e.is_connect() => return ProbeOutcome::Refused,
            Err(e) => return ProbeOutcome::Unexpected(e.to_string()),
        };

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return ProbeOutcome::Unexpected(format!("HTTP {}", status.as_u16()));
        }

        match resp.json::<Value>().await {
            Ok(body) => match body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                Some(ws) if !ws.is_empty() => ProbeOutcome::Ready(ws.to_string()),
                _ => ProbeOutcome::Malformed("version payload has no webSocketDebuggerUrl".into()),
            },
            Err(e) => ProbeOutcome::Malformed(format!("invalid version payload: {}", e)),
        }
    }
}

/// Poll until the endpoint is ready or the attempt budget runs out.
pub async fn wait_for_debugger(
    endpoint: &dyn DebugEndpoint,
    base_url: &str,
    policy: AttachPolicy,
) -> Result<String> {
    let mut last_error = String::from("no response");

    for attempt in 1..=policy.max_attempts {
        match endpoint.probe(base_url).await {
            ProbeOutcome::Ready(ws_url) => {
                debug!(attempt, ws_url = %ws_url, "Debugging endpoint ready");
                return Ok(ws_url);
            }
            ProbeOutcome::Refused => {
                last_error = "connection refused".to_string();
            }
            ProbeOutcome::Unexpected(reason) | ProbeOutcome::Malformed(reason) => {
                debug!(attempt, reason = %reason, "Debugging endpoint not usable yet");
                last_error = reason;
            }
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(Error::AttachTimeout(format!(
        "{} after {} attempts",
        last_error, policy.max_attempts
    )))
}

/// A running, attached browser.
pub struct BrowserHandle {
    process: Option<Child>,
    pub process_id: Option<u32>,
    /// Browser-level control channel (`ws://...`).
    pub debug_endpoint: String,
    /// HTTP base of the debugging server, e.g. `http://127.0.0.1:9222`.
    pub http_base: String,
    pub debug_port: u16,
    pub profile_dir: Option<PathBuf>,
}

impl BrowserHandle {
    /// Handle to a browser this process did not start. Releasing it only
    /// forgets it.
    pub fn detached(http_base: impl Into<String>, debug_endpoint: impl Into<String>) -> Self {
        let http_base = http_base.into();
        let debug_port = url::Url::parse(&http_base)
            .ok()
            .and_then(|u| u.port_or_known_default())
            .unwrap_or(0);
        Self {
            process: None,
            process_id: None,
            debug_endpoint: debug_endpoint.into(),
            http_base,
            debug_port,
            profile_dir: None,
        }
    }

    pub fn is_detached(&self) -> bool {
        self.process.is_none()
    }

    /// Terminate the process and delete the profile directory.
    pub async fn release(mut self) {
        if let Some(mut child) = self.process.take() {
            if let Err(e) = child.kill().await {
                debug!(pid = ?self.process_id, "Browser already exited: {}", e);
            }
        }
        if let Some(dir) = self.profile_dir.take() {
            remove_profile(&dir).await;
        }
    }
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        if let Some(child) = self.process.as_mut() {
            let _ = child.start_kill();
        }
        if let Some(dir) = self.profile_dir.take() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

impl std::fmt::Debug for BrowserHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserHandle")
            .field("process_id", &self.process_id)
            .field("debug_endpoint", &self.debug_endpoint)
            .field("debug_port", &self.debug_port)
            .field("profile_dir", &self.profile_dir)
            .finish()
    }
}

async fn remove_profile(dir: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(dir = %dir.display(), "Failed to remove browser profile: {}", e);
        }
    }
}

/// Seam the orchestrator launches browsers through.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, job_id: &str) -> Result<BrowserHandle>;

    async fn release(&self, handle: BrowserHandle) {
        handle.release().await;
    }

    /// Whether a launch could plausibly succeed (executable found or an
    /// external browser configured).
    fn is_available(&self) -> bool;
}

pub struct BrowserSupervisor {
    candidates: Vec<String>,
    headless: bool,
    extra_args: Vec<String>,
    profile_root: PathBuf,
    attach_url: Option<String>,
    policy: AttachPolicy,
    endpoint: Arc<dyn DebugEndpoint>,
}

impl BrowserSupervisor {
    pub fn new(config: &BrowserConfig, paths: &Paths) -> Self {
        let mut candidates = config.executables.clone();
        candidates.extend(default_candidates().iter().map(|c| c.to_string()));
        Self {
            candidates,
            headless: config.headless,
            extra_args: config.extra_args.clone(),
            profile_root: config.profile_root(paths),
            attach_url: config
                .attach_url
                .as_deref()
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
            policy: AttachPolicy::from_config(config),
            endpoint: Arc::new(HttpDebugEndpoint::new()),
        }
    }

    pub fn with_policy(mut self, policy: AttachPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_endpoint(mut self, endpoint: Arc<dyn DebugEndpoint>) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Replace the executable search list entirely.
    pub fn with_candidates(mut self, candidates: Vec<String>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn locate_executable(&self) -> Result<String> {
        find_browser_binary(&self.candidates).ok_or_else(|| {
            Error::BrowserNotFound(format!(
                "none of {} candidate executables exist",
                self.candidates.len()
            ))
        })
    }

    /// Start a browser for `job_id` and wait for its debugging endpoint.
    pub async fn launch(&self, job_id: &str) -> Result<BrowserHandle> {
        if let Some(url) = &self.attach_url {
            return self.attach_existing(url).await;
        }

        let executable = self.locate_executable()?;
        let port = find_free_port().await?;
        let profile_dir = self.fresh_profile_dir(job_id);
        tokio::fs::create_dir_all(&profile_dir).await?;

        let args = build_browser_args(port, &profile_dir, self.headless, &self.extra_args);
        info!(
            job_id = job_id,
            port = port,
            executable = %executable,
            profile = %profile_dir.display(),
            "Launching browser"
        );

        let child = match Command::new(&executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                remove_profile(&profile_dir).await;
                return Err(Error::Other(format!("failed to start {}: {}", executable, e)));
            }
        };

        self.attach(child, port, profile_dir).await
    }

    /// Run the attach handshake against an already spawned process. On
    /// failure the process is killed and the profile removed.
    pub async fn attach(&self, child: Child, port: u16, profile_dir: PathBuf) -> Result<BrowserHandle> {
        let http_base = format!("http://127.0.0.1:{}", port);
        let mut handle = BrowserHandle {
            process_id: child.id(),
            process: Some(child),
            debug_endpoint: String::new(),
            http_base,
            debug_port: port,
            profile_dir: Some(profile_dir),
        };

        match wait_for_debugger(self.endpoint.as_ref(), &handle.http_base, self.policy).await {
            Ok(ws_url) => {
                info!(port = port, pid = ?handle.process_id, "Browser attached");
                handle.debug_endpoint = ws_url;
                Ok(handle)
            }
            Err(e) => {
                warn!(port = port, pid = ?handle.process_id, "Browser attach failed: {}", e);
                handle.release().await;
                Err(e)
            }
        }
    }

    async fn attach_existing(&self, url: &str) -> Result<BrowserHandle> {
        url::Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid browser.attachUrl {}: {}", url, e)))?;
        let ws_url = wait_for_debugger(self.endpoint.as_ref(), url, self.policy).await?;
        info!(attach_url = url, "Attached to external browser");
        Ok(BrowserHandle::detached(url, ws_url))
    }

    fn fresh_profile_dir(&self, job_id: &str) -> PathBuf {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        self.profile_root
            .join(format!("formpilot-{}-{}", job_id, &suffix[..8]))
    }
}

#[async_trait]
impl BrowserLauncher for BrowserSupervisor {
    async fn launch(&self, job_id: &str) -> Result<BrowserHandle> {
        BrowserSupervisor::launch(self, job_id).await
    }

    fn is_available(&self) -> bool {
        self.attach_url.is_some() || self.locate_executable().is_ok()
    }
}

/// Command line for a Chromium-family browser.
pub fn build_browser_args(
    debug_port: u16,
    user_data_dir: &Path,
    headless: bool,
    extra_args: &[String],
) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--no-proxy-server".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-sync".to_string(),
        "--password-store=basic".to_string(),
    ];
    if headless {
        args.push("--headless=new".to_string());
    }
    args.push("--window-size=1280,900".to_string());
    args.extend(extra_args.iter().cloned());
    args.push("about:blank".to_string());
    args
}

fn default_candidates() -> &'static [&'static str] {
    if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ]
    } else {
        &[
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
            "/snap/bin/chromium",
            "microsoft-edge",
        ]
    }
}

/// First candidate that exists on disk or resolves on PATH.
pub fn find_browser_binary(candidates: &[String]) -> Option<String> {
    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.clone());
        }
        if !candidate.contains('/') && !candidate.contains('\\') {
            if let Ok(path) = which::which(candidate) {
                return Some(path.display().to_string());
            }
        }
    }
    None
}

async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const WS: &str = "ws://127.0.0.1:9222/devtools/browser/6d1c";

    struct ScriptedEndpoint {
        refusals: u32,
        calls: AtomicU32,
    }

    impl ScriptedEndpoint {
        fn new(refusals: u32) -> Self {
            Self {
                refusals,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DebugEndpoint for ScriptedEndpoint {
        async fn probe(&self, _base_url: &str) -> ProbeOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.refusals {
                ProbeOutcome::Refused
            } else {
                ProbeOutcome::Ready(WS.to_string())
            }
        }
    }

    struct GatewayErrorEndpoint;

    #[async_trait]
    impl DebugEndpoint for GatewayErrorEndpoint {
        async fn probe(&self, _base_url: &str) -> ProbeOutcome {
            ProbeOutcome::Unexpected("HTTP 502".to_string())
        }
    }

    fn fast_policy() -> AttachPolicy {
        AttachPolicy {
            interval: Duration::from_millis(1),
            max_attempts: 20,
        }
    }

    fn supervisor(root: &Path, endpoint: Arc<dyn DebugEndpoint>) -> BrowserSupervisor {
        let paths = Paths::with_base(root.join("home"));
        let config = BrowserConfig {
            profile_root: Some(root.join("profiles").display().to_string()),
            ..Default::default()
        };
        BrowserSupervisor::new(&config, &paths)
            .with_policy(fast_policy())
            .with_endpoint(endpoint)
    }

    #[cfg(unix)]
    fn spawn_sleeper() -> Child {
        Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[cfg(unix)]
    fn process_alive(pid: u32) -> bool {
        Path::new(&format!("/proc/{}", pid)).exists()
    }

    #[tokio::test]
    async fn test_attach_succeeds_on_sixth_poll() {
        let endpoint = ScriptedEndpoint::new(5);
        let ws = wait_for_debugger(&endpoint, "http://127.0.0.1:1", fast_policy())
            .await
            .unwrap();
        assert_eq!(ws, WS);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_attach_times_out_after_budget() {
        let endpoint = ScriptedEndpoint::new(u32::MAX);
        let err = wait_for_debugger(&endpoint, "http://127.0.0.1:1", fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AttachTimeout(ref m) if m.contains("connection refused")));
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_non_200_is_recorded_as_last_error() {
        let err = wait_for_debugger(&GatewayErrorEndpoint, "http://127.0.0.1:1", fast_policy())
            .await
            .unwrap_err();
        match err {
            Error::AttachTimeout(msg) => assert!(msg.contains("HTTP 502"), "{}", msg),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_attach_terminates_process_and_removes_profile() {
        let dir = tempfile::TempDir::new().unwrap();
        let sup = supervisor(dir.path(), Arc::new(ScriptedEndpoint::new(u32::MAX)));
        let profile = dir.path().join("profiles").join("p1");
        std::fs::create_dir_all(&profile).unwrap();

        let child = spawn_sleeper();
        let pid = child.id().unwrap();
        assert!(process_alive(pid));

        let err = sup.attach(child, 9, profile.clone()).await.unwrap_err();
        assert!(matches!(err, Error::AttachTimeout(_)));
        assert!(!process_alive(pid));
        assert!(!profile.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_attach_then_release() {
        let dir = tempfile::TempDir::new().unwrap();
        let sup = supervisor(dir.path(), Arc::new(ScriptedEndpoint::new(2)));
        let profile = dir.path().join("profiles").join("p2");
        std::fs::create_dir_all(&profile).unwrap();

        let handle = sup.attach(spawn_sleeper(), 9333, profile.clone()).await.unwrap();
        let pid = handle.process_id.unwrap();
        assert_eq!(handle.debug_endpoint, WS);
        assert_eq!(handle.http_base, "http://127.0.0.1:9333");
        assert!(!handle.is_detached());

        handle.release().await;
        assert!(!process_alive(pid));
        assert!(!profile.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_launch_uses_fresh_profile_per_call() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let exe = dir.path().join("fake-chrome");
        std::fs::write(&exe, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let sup = supervisor(dir.path(), Arc::new(ScriptedEndpoint::new(0)))
            .with_candidates(vec![exe.display().to_string()]);

        let a = sup.launch("job-a").await.unwrap();
        let b = sup.launch("job-a").await.unwrap();
        assert_ne!(a.profile_dir, b.profile_dir);
        assert_ne!(a.debug_port, 0);
        let dir_a = a.profile_dir.clone().unwrap();
        assert!(dir_a.is_dir());
        assert!(dir_a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("formpilot-job-a-"));

        a.release().await;
        b.release().await;
        assert!(!dir_a.exists());
    }

    #[tokio::test]
    async fn test_browser_not_found() {
        let dir = tempfile::TempDir::new().unwrap();
        let sup = supervisor(dir.path(), Arc::new(ScriptedEndpoint::new(0)))
            .with_candidates(vec!["/nonexistent/formpilot/chrome".to_string()]);
        let err = sup.launch("job").await.unwrap_err();
        assert!(matches!(err, Error::BrowserNotFound(_)));
        assert!(!BrowserLauncher::is_available(&sup));
    }

    #[tokio::test]
    async fn test_attach_url_yields_detached_handle() {
        let dir = tempfile::TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let config = BrowserConfig {
            attach_url: Some("http://127.0.0.1:9222/".to_string()),
            ..Default::default()
        };
        let sup = BrowserSupervisor::new(&config, &paths)
            .with_policy(fast_policy())
            .with_endpoint(Arc::new(ScriptedEndpoint::new(1)))
            .with_candidates(Vec::new());

        assert!(BrowserLauncher::is_available(&sup));
        let handle = sup.launch("job").await.unwrap();
        assert!(handle.is_detached());
        assert_eq!(handle.debug_port, 9222);
        assert_eq!(handle.http_base, "http://127.0.0.1:9222");
        assert!(handle.profile_dir.is_none());
        handle.release().await;
    }

    #[test]
    fn test_browser_args() {
        let args = build_browser_args(9333, Path::new("/tmp/prof"), true, &["--lang=en".into()]);
        assert!(args.contains(&"--remote-debugging-port=9333".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/prof".to_string()));
        assert!(args.contains(&"--no-proxy-server".to_string()));
        assert!(args.contains(&"--disable-background-networking".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--lang=en".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("about:blank"));

        let headed = build_browser_args(9333, Path::new("/tmp/prof"), false, &[]);
        assert!(!headed.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn test_policy_from_config() {
        let config = BrowserConfig {
            poll_interval_ms: 250,
            max_attempts: 0,
            ..Default::default()
        };
        let policy = AttachPolicy::from_config(&config);
        assert_eq!(policy.interval, Duration::from_millis(250));
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(AttachPolicy::default().max_attempts, 20);
    }

    #[tokio::test]
    async fn test_http_probe_refused_on_closed_port() {
        let port = find_free_port().await.unwrap();
        let outcome = HttpDebugEndpoint::new()
            .probe(&format!("http://127.0.0.1:{}", port))
            .await;
        assert_eq!(outcome, ProbeOutcome::Refused);
    }

    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_http_probe_ready() {
        let base = serve_once(
            "HTTP/1.1 200 OK",
            r#"{"Browser":"Chrome/126.0","webSocketDebuggerUrl":"ws://127.0.0.1:9222/devtools/browser/6d1c"}"#,
        )
        .await;
        let outcome = HttpDebugEndpoint::new().probe(&base).await;
        assert_eq!(outcome, ProbeOutcome::Ready(WS.to_string()));
    }

    #[tokio::test]
    async fn test_http_probe_gateway_error() {
        let base = serve_once("HTTP/1.1 502 Bad Gateway", "{}").await;
        let outcome = HttpDebugEndpoint::new().probe(&base).await;
        assert_eq!(outcome, ProbeOutcome::Unexpected("HTTP 502".to_string()));
    }

    #[tokio::test]
    async fn test_http_probe_malformed() {
        let base = serve_once("HTTP/1.1 200 OK", r#"{"Browser":"Chrome/126.0"}"#).await;
        let outcome = HttpDebugEndpoint::new().probe(&base).await;
        assert!(matches!(outcome, ProbeOutcome::Malformed(_)));
    }
}
