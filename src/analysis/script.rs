use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::config::AppConfig;
use crate::error::CoreError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Delegates heavier analysis to an out-of-process numeric script.
///
/// Data is handed over through a temporary CSV file and read back from a
/// sibling `.data` file of newline-delimited floats. The subprocess is an
/// untrusted, slow dependency: it runs under a hard deadline and is killed
/// on timeout, with no retry.
pub struct ScriptBridge {
    executable: PathBuf,
    scripts_dir: PathBuf,
    timeout: Duration,
}

impl ScriptBridge {
    pub fn new(executable: impl Into<PathBuf>, scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            scripts_dir: scripts_dir.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Bridge pointed at the configured interpreter and scripts directory.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.python_executable, &config.python_scripts_dir)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `<executable> <scripts_dir>/<script_name> <data_file>` and return
    /// the floats the script wrote to `<data_file>.data`.
    #[instrument(skip(self, values, params), fields(script = %script_name, len = values.len()))]
    pub async fn process(
        &self,
        values: &[f64],
        script_name: &str,
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<f64>, CoreError> {
        let script_path = self.scripts_dir.join(script_name);
        if !script_path.is_file() {
            return Err(CoreError::NotFound(format!(
                "script {}",
                script_path.display()
            )));
        }

        let temp = tempfile::Builder::new()
            .prefix("signals")
            .suffix(".csv")
            .tempfile()
            .map_err(|e| CoreError::Processing(format!("temp file creation failed: {}", e)))?;
        let data_path = temp.path().to_path_buf();
        self.write_input(&data_path, values, params).await?;

        let mut child = Command::new(&self.executable)
            .arg(&script_path)
            .arg(&data_path)
            .current_dir(&self.scripts_dir)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CoreError::Processing(format!("failed to spawn script: {}", e)))?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(CoreError::Processing(format!("script wait failed: {}", e)));
            }
            Err(_) => {
                let _ = child.start_kill();
                return Err(CoreError::Timeout(self.timeout));
            }
        };

        if !status.success() {
            return Err(CoreError::Processing(format!(
                "script exited abnormally: {}",
                status
            )));
        }

        let result_path = result_path_for(&data_path);
        let results = read_results(&result_path).await;
        let _ = tokio::fs::remove_file(&result_path).await;
        debug!("Script {} produced {:?} values", script_name, results.as_ref().map(Vec::len));
        results
    }

    /// CSV handoff format: an optional `# Parameters: <json>` header line,
    /// then one value per line.
    async fn write_input(
        &self,
        path: &Path,
        values: &[f64],
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<(), CoreError> {
        let mut contents = String::new();
        if !params.is_empty() {
            let json = serde_json::to_string(params)
                .map_err(|e| CoreError::Processing(format!("parameter encoding failed: {}", e)))?;
            contents.push_str("# Parameters: ");
            contents.push_str(&json);
            contents.push('\n');
        }
        for value in values {
            contents.push_str(&value.to_string());
            contents.push('\n');
        }

        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| CoreError::Processing(format!("failed to write signal data: {}", e)))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| CoreError::Processing(format!("failed to write signal data: {}", e)))?;
        file.flush()
            .await
            .map_err(|e| CoreError::Processing(format!("failed to write signal data: {}", e)))?;
        Ok(())
    }
}

fn result_path_for(data_path: &Path) -> PathBuf {
    let mut s = data_path.as_os_str().to_os_string();
    s.push(".data");
    PathBuf::from(s)
}

async fn read_results(path: &Path) -> Result<Vec<f64>, CoreError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CoreError::Processing(format!("missing script output: {}", e)))?;

    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            line.trim()
                .parse::<f64>()
                .map_err(|e| CoreError::Processing(format!("malformed script output {:?}: {}", line, e)))
        })
        .collect()
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &Path, name: &str, body: &str) {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[tokio::test]
    async fn round_trips_values_through_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        // Doubles every non-comment line into the result file.
        write_script(
            dir.path(),
            "double.sh",
            "#!/bin/sh\ngrep -v '^#' \"$1\" | awk '{ print $1 * 2 }' > \"$1.data\"\n",
        );

        let bridge = ScriptBridge::new("/bin/sh", dir.path());
        let mut params = HashMap::new();
        params.insert("gain".to_string(), serde_json::json!(2));

        let out = bridge
            .process(&[1.0, 2.5, -3.0], "double.sh", &params)
            .await
            .unwrap();
        assert_eq!(out, vec![2.0, 5.0, -6.0]);
    }

    #[tokio::test]
    async fn timeout_kills_the_subprocess() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "slow.sh", "#!/bin/sh\nsleep 30\n");

        let bridge = ScriptBridge::new("/bin/sh", dir.path())
            .with_timeout(Duration::from_millis(200));
        let err = bridge
            .process(&[1.0], "slow.sh", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Timeout(_)));
    }

    #[tokio::test]
    async fn abnormal_exit_is_a_processing_error() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "boom.sh", "#!/bin/sh\nexit 3\n");

        let bridge = ScriptBridge::new("/bin/sh", dir.path());
        let err = bridge
            .process(&[1.0], "boom.sh", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Processing(_)));
    }

    #[tokio::test]
    async fn malformed_output_is_a_processing_error() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "garbage.sh",
            "#!/bin/sh\nprintf 'not-a-number\\n' > \"$1.data\"\n",
        );

        let bridge = ScriptBridge::new("/bin/sh", dir.path());
        let err = bridge
            .process(&[1.0], "garbage.sh", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Processing(_)));
    }

    #[tokio::test]
    async fn builds_from_app_config() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "identity.sh", "#!/bin/sh\ncp \"$1\" \"$1.data\"\n");

        let config = AppConfig {
            mqtt_host: "localhost".to_string(),
            mqtt_port: 1883,
            mqtt_client_id_prefix: "test".to_string(),
            database_url: "postgres://unused".to_string(),
            ingest_topic: "devices/+/readings".to_string(),
            instance_id: "1".to_string(),
            kafka_brokers: None,
            kafka_topic: "telemetry-bridge".to_string(),
            kafka_group_id: "test".to_string(),
            batch_size: 100,
            flush_interval_ms: 5000,
            worker_concurrency: 4,
            python_executable: "/bin/sh".to_string(),
            python_scripts_dir: dir.path().display().to_string(),
        };

        let bridge = ScriptBridge::from_config(&config);
        let out = bridge
            .process(&[1.5, -2.0], "identity.sh", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(out, vec![1.5, -2.0]);
    }

    #[tokio::test]
    async fn unknown_script_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = ScriptBridge::new("/bin/sh", dir.path());
        let err = bridge
            .process(&[1.0], "missing.sh", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
