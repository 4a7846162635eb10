//! Failure diagnostics bundle
//!
//! Collection never fails: every error is logged, recorded in
//! `collection-errors.txt`, and the remaining steps still run.

use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, warn};

use crate::exec::kubectl::Kubectl;
use crate::filesys::dir::Dir;

const LOG_TAIL_LINES: u32 = 2000;

#[derive(Clone)]
pub struct DiagnosticsCollector {
    kubectl: Kubectl,
    root: Dir,
}

#[derive(Default)]
struct Bundle {
    errors: Vec<String>,
}

impl DiagnosticsCollector {
    pub fn new(kubectl: Kubectl, root: Dir) -> Self {
        Self { kubectl, root }
    }

    /// Gather logs, descriptions and status for `pods` plus namespace events.
    /// Returns the bundle directory when it could be created.
    pub async fn collect(&self, namespace: &str, pods: &[String]) -> Option<PathBuf> {
        let dir = self
            .root
            .subdir(&Utc::now().format("%Y%m%dT%H%M%SZ").to_string());
        if let Err(e) = dir.create().await {
            warn!("Unable to create diagnostics directory {:?}: {}", dir.path(), e);
            return None;
        }

        let mut bundle = Bundle::default();
        for pod in pods {
            self.collect_pod(&dir, namespace, pod, &mut bundle).await;
        }

        match self.kubectl.events(namespace, None).await {
            Ok(events) => write(&dir, "events.txt", &events, &mut bundle).await,
            Err(e) => bundle.errors.push(format!("events: {}", e)),
        }

        if !bundle.errors.is_empty() {
            for error in &bundle.errors {
                warn!("Diagnostics: {}", error);
            }
            let text = bundle.errors.join("\n");
            if let Err(e) = dir.file("collection-errors.txt").write_string(&text).await {
                warn!("Unable to record diagnostics errors: {}", e);
            }
        }

        info!("Diagnostics written to {:?}", dir.path());
        Some(dir.path().to_path_buf())
    }

    async fn collect_pod(&self, dir: &Dir, namespace: &str, pod: &str, bundle: &mut Bundle) {
        match self.kubectl.logs(namespace, pod, false, Some(LOG_TAIL_LINES)).await {
            Ok(logs) => write(dir, &format!("{}.log", pod), &logs, bundle).await,
            Err(e) => bundle.errors.push(format!("{} logs: {}", pod, e)),
        }

        // only exists after a restart
        if let Ok(logs) = self.kubectl.logs(namespace, pod, true, Some(LOG_TAIL_LINES)).await {
            write(dir, &format!("{}.previous.log", pod), &logs, bundle).await;
        }

        match self.kubectl.describe(namespace, "pod", pod).await {
            Ok(text) => write(dir, &format!("{}.describe.txt", pod), &text, bundle).await,
            Err(e) => bundle.errors.push(format!("{} describe: {}", pod, e)),
        }

        match self.kubectl.get_json(namespace, "pod", pod).await {
            Ok(json) => {
                let status = serde_json::from_str::<serde_json::Value>(&json)
                    .ok()
                    .and_then(|v| v.get("status").cloned())
                    .and_then(|s| serde_json::to_string_pretty(&s).ok())
                    .unwrap_or(json);
                write(dir, &format!("{}.status.json", pod), &status, bundle).await;
            }
            Err(e) => bundle.errors.push(format!("{} status: {}", pod, e)),
        }
    }
}

async fn write(dir: &Dir, name: &str, contents: &str, bundle: &mut Bundle) {
    if let Err(e) = dir.file(name).write_string(contents).await {
        bundle.errors.push(format!("writing {}: {}", name, e));
    }
}
