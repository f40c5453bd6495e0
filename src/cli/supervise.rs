//! Supervise command implementation

use crate::capture::wait_for_stop_signal;
use crate::config::Config;
use crate::data::DataLayout;
use crate::supervisor::{CommandSpec, OsProcessControl, Watchdog};
use clap::Args;
use std::path::Path;
use tokio::sync::watch;

#[derive(Args, Debug)]
pub struct SuperviseArgs {
    /// Leave the capture process running when the supervisor exits
    #[arg(long)]
    pub leave_running: bool,
}

impl SuperviseArgs {
    pub async fn execute(&self, config: &Config, config_path: &str) -> anyhow::Result<()> {
        let mut supervisor = config.supervisor.clone();
        supervisor.leave_running_on_exit |= self.leave_running;

        let layout = DataLayout::new(&config.storage.data_dir, &config.capture.symbol);
        layout.ensure_dirs()?;

        let spec = CommandSpec::resolve(supervisor.command.as_deref(), Path::new(config_path))?;
        tracing::info!(program = ?spec.program, args = ?spec.args, "Supervising capture process");

        let watchdog = Watchdog::open(OsProcessControl::new(spec), layout, &supervisor)?;

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            wait_for_stop_signal().await;
            let _ = stop_tx.send(true);
        });

        watchdog.run(stop_rx).await?;
        tracing::info!("Supervisor stopped");
        Ok(())
    }
}
