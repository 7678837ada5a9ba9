mod api;
mod host;
mod loader;
mod protocol;
mod sandbox;

use bevy::app::ScheduleRunnerPlugin;
use bevy::log::LogPlugin;
use bevy::pbr::wireframe::WireframePlugin;
use bevy::prelude::*;
use bevy::render::settings::{WgpuFeatures, WgpuSettings};
use bevy::render::RenderPlugin;
use std::time::Duration;

#[derive(serde::Deserialize, Default)]
struct StartupConfig {
    window_title: Option<String>,
    window_width: Option<f32>,
    window_height: Option<f32>,
    background_color: Option<[f32; 3]>,
}

fn load_startup_config() -> StartupConfig {
    let path = std::env::var("PROMPTSCENE_CONFIG")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "promptscene.json".to_string());
    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<StartupConfig>(&contents) {
            Ok(cfg) => {
                println!("[promptscene] Loaded startup config from {}", path);
                cfg
            }
            Err(e) => {
                eprintln!("[promptscene] Failed to parse {}: {}", path, e);
                StartupConfig::default()
            }
        },
        Err(_) => StartupConfig::default(),
    }
}

fn main() {
    let headless = std::env::args().any(|a| a == "--headless");
    let startup_config = load_startup_config();
    let mut app = App::new();

    if headless {
        // No window: scripts still run, screenshots report an error.
        app.add_plugins(
            MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(
                1.0 / 60.0,
            ))),
        )
        .add_plugins(LogPlugin::default());
        sandbox::register_headless_assets(&mut app);
        println!("[promptscene] Starting in HEADLESS mode");
    } else {
        let window_title = startup_config
            .window_title
            .unwrap_or_else(|| "promptscene".to_string());
        let window_width = startup_config.window_width.unwrap_or(1280.0);
        let window_height = startup_config.window_height.unwrap_or(720.0);

        let plugins = DefaultPlugins
            .set(WindowPlugin {
                primary_window: Some(Window {
                    title: window_title,
                    resolution: (window_width, window_height).into(),
                    present_mode: bevy::window::PresentMode::AutoVsync,
                    ..default()
                }),
                ..default()
            })
            // Line polygon mode is needed for the wireframe toggle.
            .set(RenderPlugin {
                render_creation: WgpuSettings {
                    features: WgpuFeatures::POLYGON_MODE_LINE,
                    ..default()
                }
                .into(),
                ..default()
            });
        app.add_plugins(plugins)
            .add_plugins(WireframePlugin::default());
        println!("[promptscene] Starting in WINDOWED mode");
    }

    app.add_plugins(sandbox::SandboxPlugin {
        interactive: !headless,
    });
    if let Some(bg) = startup_config.background_color {
        app.insert_resource(ClearColor(Color::srgb(bg[0], bg[1], bg[2])));
    }
    app.add_plugins(host::HostPlugin);

    app.run();
}
