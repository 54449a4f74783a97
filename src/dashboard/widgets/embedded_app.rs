use super::Widget;
use crate::dashboard::process::{self, CommandLine};
use crate::dashboard::timer::ScheduledTimer;
use eframe::egui;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Child;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddedAppConfig {
    pub command_line: String,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppState {
    NotStarted,
    Running(u32),
    Exited(Option<i32>),
    Failed(String),
}

const STATUS_POLL: Duration = Duration::from_secs(1);

/// External application owned by the dashboard: started with the tree, killed on exit.
pub struct EmbeddedAppWidget {
    command: CommandLine,
    working_dir: Option<PathBuf>,
    child: Option<Child>,
    state: AppState,
    poll: ScheduledTimer,
}

impl EmbeddedAppWidget {
    pub fn new(cfg: EmbeddedAppConfig) -> anyhow::Result<Self> {
        Ok(Self {
            command: CommandLine::parse(&cfg.command_line)?,
            working_dir: cfg.working_dir,
            child: None,
            state: AppState::NotStarted,
            poll: ScheduledTimer::unbound(STATUS_POLL),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    fn launch(&mut self) {
        let mut cmd = match self.command.command(&[]) {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!(error = %e, "embedded app has no command");
                self.state = AppState::Failed(e.to_string());
                return;
            }
        };
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        match process::own_process_group(&mut cmd).spawn() {
            Ok(child) => {
                tracing::info!(program = self.command.program(), pid = child.id(), "embedded app started");
                self.state = AppState::Running(child.id());
                self.child = Some(child);
                self.poll.start();
            }
            Err(e) => {
                tracing::warn!(program = self.command.program(), error = %e, "embedded app failed to start");
                self.state = AppState::Failed(e.to_string());
            }
        }
    }

    fn check_exit(&mut self) {
        let Some(child) = self.child.as_mut() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::info!(program = self.command.program(), %status, "embedded app exited");
                self.state = AppState::Exited(status.code());
                self.child = None;
                self.poll.stop();
            }
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "cannot query embedded app"),
        }
    }
}

impl Widget for EmbeddedAppWidget {
    fn render(&mut self, ui: &mut egui::Ui) {
        ui.vertical_centered(|ui| {
            ui.strong(self.command.program());
            match &self.state {
                AppState::NotStarted => {
                    ui.weak("Not started");
                }
                AppState::Running(pid) => {
                    ui.label(format!("Running (pid {pid})"));
                }
                AppState::Exited(code) => {
                    let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                    ui.label(format!("Exited ({code})"));
                }
                AppState::Failed(error) => {
                    ui.colored_label(ui.visuals().error_fg_color, error);
                }
            }
            let can_restart = matches!(self.state, AppState::Exited(_) | AppState::Failed(_));
            if can_restart && ui.button("Restart").clicked() {
                self.launch();
            }
        });
    }

    fn tick(&mut self, now: Instant) {
        if self.poll.poll_at(now) {
            self.check_exit();
        }
    }

    fn start(&mut self) {
        self.launch();
    }

    fn stop(&mut self) {
        self.poll.stop();
        if let Some(mut child) = self.child.take() {
            tracing::info!(pid = child.id(), "stopping embedded app");
            process::terminate_tree(&mut child);
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.poll.next_due()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn process_lives_between_start_and_stop() {
        let mut app = EmbeddedAppWidget::new(EmbeddedAppConfig {
            command_line: "sleep 30".into(),
            working_dir: None,
        })
        .unwrap();
        assert_eq!(app.state(), &AppState::NotStarted);
        app.start();
        assert!(matches!(app.state(), AppState::Running(_)));
        app.stop();
        assert!(app.child.is_none());
    }

    #[test]
    fn missing_program_is_reported() {
        let mut app = EmbeddedAppWidget::new(EmbeddedAppConfig {
            command_line: "/nonexistent/deskboard-test-binary".into(),
            working_dir: None,
        })
        .unwrap();
        app.start();
        assert!(matches!(app.state(), AppState::Failed(_)));
    }

    #[test]
    fn stop_also_ends_processes_the_app_launched() {
        use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("helper.pid");
        let mut app = EmbeddedAppWidget::new(EmbeddedAppConfig {
            command_line: format!("sh -c 'sleep 30 & echo $! > {}; wait'", pid_path.display()),
            working_dir: None,
        })
        .unwrap();
        app.start();

        let deadline = Instant::now() + Duration::from_secs(5);
        let helper = loop {
            let text = std::fs::read_to_string(&pid_path).unwrap_or_default();
            if let Ok(pid) = text.trim().parse::<u32>() {
                break Pid::from_u32(pid);
            }
            assert!(Instant::now() < deadline, "helper pid never written");
            std::thread::sleep(Duration::from_millis(20));
        };

        app.stop();
        let mut system = System::new();
        loop {
            system.refresh_processes(ProcessesToUpdate::Some(&[helper]), true);
            let alive = system
                .process(helper)
                .is_some_and(|p| p.status() != ProcessStatus::Zombie);
            if !alive {
                break;
            }
            assert!(Instant::now() < deadline, "helper process survived stop");
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}
