use std::process::{Child, Command, Stdio};

/// Independent audio-preview player toggled from the keyboard. It never talks
/// to the pipelines; it just starts or kills an external player process.
pub struct AudioPreview {
    player: Vec<String>,
    url: Option<String>,
    child: Option<Child>,
}

impl AudioPreview {
    /// `player` is a command line; the URL is appended as its last argument.
    pub fn new(player: &str, url: Option<String>) -> Self {
        Self {
            player: player.split_whitespace().map(str::to_string).collect(),
            url,
            child: None,
        }
    }

    pub fn is_running(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };
        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                log::info!("Preview: player exited with {}", status);
                self.child = None;
                false
            }
            Err(e) => {
                log::warn!("Preview: failed to query player: {}", e);
                self.child = None;
                false
            }
        }
    }

    /// Starts the player if it is not running, otherwise stops it. Returns
    /// whether it is running afterwards.
    pub fn toggle(&mut self) -> bool {
        if self.is_running() {
            self.stop();
            return false;
        }

        let Some(url) = self.url.as_deref() else {
            log::info!("Preview: no preview URL configured (--preview-url)");
            return false;
        };
        let Some((program, args)) = self.player.split_first() else {
            log::warn!("Preview: empty player command");
            return false;
        };

        match Command::new(program)
            .args(args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => {
                log::info!("Preview: playing {} (pid {})", url, child.id());
                self.child = Some(child);
                true
            }
            Err(e) => {
                log::warn!("Preview: failed to start {}: {}", program, e);
                false
            }
        }
    }

    pub fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill() {
                log::debug!("Preview: kill failed: {}", e);
            }
            let _ = child.wait();
            log::info!("Preview: stopped");
        }
    }
}

impl Drop for AudioPreview {
    fn drop(&mut self) {
        self.stop();
    }
}
