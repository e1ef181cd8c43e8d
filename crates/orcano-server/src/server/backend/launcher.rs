use crate::server::config::LaunchConfig;
use core::future::Future;
use std::{io, process::Stdio};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
};

/// Environment variable carrying the control port into the backend process.
pub const PORT_ENV: &str = "ORCANO_BACKEND_PORT";

/// Starts backend processes bound to a given control port.
pub trait Launcher: Send + Sync + 'static {
    type Process: BackendProcess;

    fn launch(&self, port: u16) -> io::Result<Self::Process>;
}

/// Handle to one running backend process.
pub trait BackendProcess: Send + 'static {
    fn pid(&self) -> Option<u32>;

    /// Resolves once the process has exited, yielding its exit code if it
    /// had one. Must be cancel-safe.
    fn wait(&mut self) -> impl Future<Output = io::Result<Option<i32>>> + Send;

    /// Kills the process and reaps it.
    fn kill(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Launches the configured emulator executable.
#[derive(Debug, Clone)]
pub struct EmulatorLauncher {
    config: LaunchConfig,
}

impl EmulatorLauncher {
    pub const fn new(config: LaunchConfig) -> Self {
        Self { config }
    }

    /// Expands `{image}` and `{port}` in the argument template.
    fn args(&self, port: u16) -> Vec<String> {
        let image = self.config.image_path.to_string_lossy();
        let port = port.to_string();
        self.config
            .backend_args
            .iter()
            .map(|arg| arg.replace("{image}", &image).replace("{port}", &port))
            .collect()
    }
}

impl Launcher for EmulatorLauncher {
    type Process = EmulatorProcess;

    fn launch(&self, port: u16) -> io::Result<EmulatorProcess> {
        let mut child = Command::new(&self.config.backend_path)
            .args(self.args(port))
            .env(PORT_ENV, port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, port, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, port, "stderr"));
        }

        tracing::info!(
            "Launched {} (pid {:?}) on control port {port}",
            self.config.backend_path.display(),
            pid
        );
        Ok(EmulatorProcess { child })
    }
}

async fn forward_output<R>(stream: R, port: u16, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(port, stream = name, "{line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(port, stream = name, "Output stream failed: {e}");
                break;
            }
        }
    }
}

/// A spawned emulator. Killed automatically if dropped while running.
#[derive(Debug)]
pub struct EmulatorProcess {
    child: Child,
}

impl BackendProcess for EmulatorProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn wait(&mut self) -> io::Result<Option<i32>> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn launcher(path: &str, args: &[&str]) -> EmulatorLauncher {
        EmulatorLauncher::new(LaunchConfig {
            backend_path: PathBuf::from(path),
            image_path: PathBuf::from("/srv/orcano/image.dol"),
            backend_args: args.iter().map(ToString::to_string).collect(),
        })
    }

    #[test]
    fn expands_argument_template() {
        let launcher = launcher(
            "dolphin-emu-nogui",
            &["-e", "{image}", "-p", "headless", "--port={port}"],
        );
        assert_eq!(
            launcher.args(55021),
            [
                "-e",
                "/srv/orcano/image.dol",
                "-p",
                "headless",
                "--port=55021"
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn reports_exit_code() {
        let launcher = launcher("sh", &["-c", "exit 3"]);
        let mut process = launcher.launch(1).unwrap();
        assert_eq!(process.wait().await.unwrap(), Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_reaps_process() {
        let launcher = launcher("sleep", &["30"]);
        let mut process = launcher.launch(1).unwrap();
        assert!(process.pid().is_some());

        process.kill().await.unwrap();
        assert!(process.pid().is_none());
    }

    #[test]
    fn missing_executable_fails_to_launch() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = rt.enter();
        let launcher = launcher("/nonexistent/orcano-backend", &[]);
        assert!(launcher.launch(1).is_err());
    }
}
