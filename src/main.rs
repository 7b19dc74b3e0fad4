#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod config;
mod engine;
mod error;
mod headless;
mod model_download;
mod pipeline;
mod types;
mod ui;

use anyhow::Result;
use clap::Parser;
use gpui::Application;

use config::TryOnArgs;

fn main() -> Result<()> {
    env_logger::init();

    let args = TryOnArgs::parse();
    if args.headless {
        return headless::run(&args);
    }

    Application::new()
        .with_assets(gpui_component_assets::Assets)
        .run(move |app| {
            gpui_component::init(app);

            app.on_window_closed(|app| {
                if app.windows().is_empty() {
                    app.quit();
                }
            })
            .detach();

            if let Err(err) = ui::launch_ui(app, args) {
                log::error!("failed to launch ui: {err:?}");
                app.quit();
            }
        });

    Ok(())
}
