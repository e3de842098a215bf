use crate::log_sink::LogSink;
use crate::main_loop::Stage;
use crate::queue::TaskSender;
use ::sesame::commands::{Command, ImageCommand};
use ::sesame::compositor::compose;
use ::sesame::error::{DaemonError, Result};

use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatched {
    // applied on the calling thread
    Immediate,
    // queued for the main loop under this label
    Deferred(String),
}

/// Turns decoded commands into effects. Runs on connection threads, so anything
/// touching the stage goes through the task queue.
pub struct Dispatcher {
    tasks: TaskSender<Stage>,
    log: Arc<LogSink>,
    max_skybox_size: u32,
}

impl Dispatcher {
    pub fn new(tasks: TaskSender<Stage>, log: Arc<LogSink>, max_skybox_size: u32) -> Arc<Dispatcher> {
        return Arc::new(Dispatcher {
            tasks,
            log,
            max_skybox_size,
        });
    }

    pub fn dispatch(&self, cmd: Command) -> Result<Dispatched> {
        match cmd {
            Command::SetImage(c) => self.set_image(c),
            Command::SetEnvironmentSize(n) => self.set_size(n),
            Command::SetEnvironmentColor(color) => self.defer(format!("skybox_color {color:?}"), move |stage| {
                tracing::debug!(?color, "updating skybox color");
                stage.store.config_mut().fill_color = color;
                Ok(())
            }),
            Command::SwapEnvironment(id) => self.defer(format!("flip_skybox {id}"), move |stage| {
                let image = stage.store.get(&id)?.clone();
                stage.environment.apply_environment(&id, &image)?;
                stage.store.config_mut().active_image_id = Some(id);
                Ok(())
            }),
            Command::OpenLog(path) => {
                self.log.open(&path)?;
                tracing::info!(path = %path.display(), "log file opened");
                Ok(Dispatched::Immediate)
            }
            Command::LogMessage(text) => {
                tracing::info!(target: "sesame::log", "{text}");
                if !self.log.write_line(&text)? {
                    tracing::debug!("no log file open; message only went to diagnostics");
                }
                Ok(Dispatched::Immediate)
            }
            Command::Unknown(tag) => Err(DaemonError::UnknownCommand(tag)),
        }
    }

    fn set_image(&self, c: ImageCommand) -> Result<Dispatched> {
        if c.id.is_empty() {
            return Err(DaemonError::InvalidCommand("image id must not be empty".to_string()));
        }
        self.defer(format!("image {}", c.id), move |stage| {
            // size and color are read here, so earlier queued changes apply
            let config = stage.store.config();
            let (size, fill) = (config.size, config.fill_color);
            let composed = compose(&c.data, c.placement, size, fill)?;
            stage.store.put(c.id.clone(), composed);
            tracing::info!(id = %c.id, size, cached = stage.store.len(), "image loaded");
            Ok(())
        })
    }

    fn set_size(&self, n: i64) -> Result<Dispatched> {
        let size = u32::try_from(n)
            .ok()
            .filter(|size| (1..=self.max_skybox_size).contains(size))
            .ok_or_else(|| {
                DaemonError::InvalidCommand(format!(
                    "skybox size must be between 1 and {} (got {n})",
                    self.max_skybox_size
                ))
            })?;
        self.defer(format!("skybox_size {size}"), move |stage| {
            tracing::debug!(size, "updating skybox size");
            stage.store.config_mut().size = size;
            Ok(())
        })
    }

    fn defer<F>(&self, label: String, action: F) -> Result<Dispatched>
    where
        F: FnOnce(&mut Stage) -> Result<()> + Send + 'static,
    {
        self.tasks.enqueue(label.clone(), action)?;
        Ok(Dispatched::Deferred(label))
    }
}
