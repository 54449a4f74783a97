use deskboard::app::{apply_font, show_startup_error, DashboardApp};
use deskboard::dashboard::config::default_config_path;
use deskboard::dashboard::{Dashboard, DashboardConfig, UiWaker, WidgetRegistry};
use deskboard::logging;
use deskboard::pid_file::PidFile;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    let config = match DashboardConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            logging::init(false, None);
            tracing::error!(error = ?e, "cannot load configuration");
            show_startup_error("Configuration error", &format!("{e:#}"));
            return ExitCode::from(1);
        }
    };
    logging::init(config.debug_logging, config.log_file.clone());
    logging::install_panic_hook();
    tracing::info!(config = %config_path.display(), instance = %config.instance_name, "starting");

    let _pid_file = match config.pid_file.resolve().map(PidFile::acquire).transpose() {
        Ok(guard) => guard,
        Err(e) => {
            tracing::warn!(error = ?e, "continuing without pid file");
            None
        }
    };

    let registry = WidgetRegistry::with_defaults();
    let waker = UiWaker::new();
    let mut progress = |msg: &str| tracing::info!("{msg}");
    let mut dashboard = match Dashboard::build(&config, &registry, waker.clone(), &mut progress) {
        Ok(dashboard) => dashboard,
        Err(e) => {
            let e = anyhow::Error::new(e);
            tracing::error!(error = ?e, "dashboard construction failed");
            show_startup_error("Dashboard error", &format!("{e:#}"));
            return ExitCode::from(1);
        }
    };

    let options = eframe::NativeOptions {
        viewport: config.window_options.viewport(),
        ..Default::default()
    };
    let font = config.window_options.font.clone();
    let result = eframe::run_native(
        &config.window_options.title,
        options,
        Box::new(move |cc| {
            waker.install(&cc.egui_ctx);
            egui_extras::install_image_loaders(&cc.egui_ctx);
            if let Some(font) = &font {
                apply_font(&cc.egui_ctx, font);
            }
            dashboard.start();
            Box::new(DashboardApp::new(dashboard))
        }),
    );
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "window loop failed");
            ExitCode::from(1)
        }
    }
}
