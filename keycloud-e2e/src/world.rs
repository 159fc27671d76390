use std::path::PathBuf;
use std::sync::Arc;

use crate::definitions::browser::{BrowserTester, BrowserWindow};
use crate::errors::KeycloudStepError;
use crate::universe::Universe;

/// The execution context of one scenario. Owns the browser window and any
/// hosted server for exactly as long as the scenario runs; `shutdown` must
/// release both on every exit path.
pub struct ScenarioWorld {
    pub window: Option<BrowserWindow>,
    pub base_url: Option<String>,
    pub assigned_server_port: Option<u16>,
    pub threads: Vec<tokio::task::JoinHandle<Result<(), std::io::Error>>>,
    pub handles: Vec<actix_web::dev::ServerHandle>,
    pub universe: Arc<Universe>,
}

impl ScenarioWorld {
    pub fn new(universe: Arc<Universe>) -> Self {
        Self {
            window: None,
            base_url: None,
            assigned_server_port: None,
            threads: vec![],
            handles: vec![],
            universe,
        }
    }

    /// The origin the dashboard steps address. Serving the dashboard from a
    /// directory rebinds this for the rest of the scenario; otherwise the
    /// configured base URL applies.
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.universe.ctx.params.base_url.clone())
    }

    /// Resolve a possibly-relative URL against the scenario's base URL.
    pub fn resolve_url(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", self.base_url(), url.trim_start_matches('/'))
        }
    }

    pub fn ensure_port(&mut self) -> u16 {
        if self.assigned_server_port.is_none() {
            self.assigned_server_port =
                Some(portpicker::pick_unused_port().expect("no free localhost port"));
        }
        self.assigned_server_port
            .expect("port was just assigned")
    }

    pub fn purge_port(&mut self) {
        self.assigned_server_port = None;
    }

    /// Get this scenario's browser window, launching the shared browser
    /// process first if no scenario has needed it yet.
    pub async fn ensure_window(&mut self) -> Result<&BrowserWindow, KeycloudStepError> {
        if self.window.is_none() {
            let universe = Arc::clone(&self.universe);
            let browser = universe
                .browser
                .get_or_try_init(|| async {
                    BrowserTester::initialize(&universe.ctx.params).await
                })
                .await?;
            self.window = Some(browser.window().await?);
        }

        Ok(self.window.as_ref().expect("window was just ensured"))
    }

    pub fn resolve_file_path(&self, path: &str) -> PathBuf {
        self.universe.ctx.working_directory.join(path)
    }

    pub async fn shutdown(&mut self) {
        for handle in self.handles.drain(..) {
            handle.stop(false).await;
        }
        for thread in self.threads.drain(..) {
            thread.abort();
        }
        if let Some(window) = self.window.take() {
            let _ = window.close().await;
        }
    }
}
