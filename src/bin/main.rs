use bevy::log::LogPlugin;
use bevy::prelude::*;

use prostalyzer::{
    init_tracing, scheduler::SchedulerPlugin, ui::UiPlugin, vis::VisPlugin, AppStatus, CaseList,
    Settings,
};

fn main() {
    // Keep the guard alive so the file layer flushes on exit. Logging
    // failures degrade to console-only operation.
    let _guard = match init_tracing() {
        Ok(guard) => Some(guard),
        Err(error) => {
            eprintln!("Could not initialize logging: {error}");
            None
        }
    };

    App::new()
        .init_resource::<Settings>()
        .init_resource::<CaseList>()
        .init_resource::<AppStatus>()
        // The tracing subscriber is installed above; Bevy must not
        // install a second one.
        .add_plugins(
            DefaultPlugins
                .set(WindowPlugin {
                    primary_window: Some(Window {
                        title: "Prostalyzer".into(),
                        ..default()
                    }),
                    ..default()
                })
                .build()
                .disable::<LogPlugin>(),
        )
        .add_plugins(UiPlugin)
        .add_plugins(SchedulerPlugin)
        .add_plugins(VisPlugin)
        .run();
}
