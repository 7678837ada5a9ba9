//! The isolated render context: one bevy world that owns the scene graph, the
//! viewport camera and its controls. It talks to the host only through
//! [`SandboxChannels`].

pub mod capture;
pub mod controls;
pub mod scene;

use bevy::prelude::*;
use crossbeam_channel::{Receiver, TryRecvError};
use tokio::sync::mpsc::UnboundedSender;

use crate::loader::CodeLoader;
use crate::protocol::{HostMessage, SandboxEndpoint, SandboxMessage};
use capture::PendingCapture;
use controls::{OrbitControls, StageCamera};
use scene::{Baseline, StageRoot};

pub const AUTO_ROTATE_STEP: f32 = 0.01;
pub const CLEAR_COLOR: u32 = 0xf8f9fa;
pub const CAMERA_FOV_DEGREES: f32 = 75.0;
pub const CAMERA_NEAR: f32 = 0.1;
pub const CAMERA_FAR: f32 = 1000.0;
pub const CAMERA_START: Vec3 = Vec3::new(8.0, 8.0, 8.0);
pub const CONTROLS_DAMPING: f32 = 0.05;

#[derive(Resource)]
pub struct SandboxChannels {
    inbound: Receiver<String>,
    outbound: UnboundedSender<String>,
}

impl SandboxChannels {
    pub fn new(endpoint: SandboxEndpoint) -> Self {
        Self {
            inbound: endpoint.inbound,
            outbound: endpoint.outbound,
        }
    }

    pub fn send(&self, message: SandboxMessage) {
        if self.outbound.send(message.encode()).is_err() {
            warn!("[promptscene sandbox] Host endpoint closed, dropping reply");
        }
    }
}

/// View options as last requested by the host.
#[derive(Resource, Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewOptions {
    pub auto_rotate: bool,
    pub wireframe: bool,
}

#[derive(Resource, Default)]
struct ReadyAnnounced(bool);

pub struct SandboxPlugin {
    /// Wire mouse input into the orbit controls. Off in headless mode.
    pub interactive: bool,
}

impl Plugin for SandboxPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ViewOptions>()
            .init_resource::<PendingCapture>()
            .init_resource::<ReadyAnnounced>()
            .insert_resource(ClearColor(scene::hex_color(CLEAR_COLOR)))
            .insert_resource(CodeLoader::from_env())
            .add_systems(Startup, setup_stage)
            .add_systems(PostStartup, announce_ready)
            .add_systems(
                Update,
                (
                    pump_host_messages,
                    auto_rotate_stage,
                    controls::update_orbit_controls,
                    capture::expire_stalled_capture,
                )
                    .chain(),
            )
            .add_observer(capture::on_screenshot_captured);

        if self.interactive {
            app.add_systems(
                Update,
                controls::orbit_input.before(controls::update_orbit_controls),
            );
        }
    }
}

/// Asset stores the stage needs when running without the render plugins.
pub fn register_headless_assets(app: &mut App) {
    app.init_resource::<Assets<Mesh>>()
        .init_resource::<Assets<StandardMaterial>>();
}

fn setup_stage(world: &mut World) {
    let baseline = scene::spawn_baseline(world);
    world.spawn((
        StageCamera,
        Camera3d::default(),
        Projection::Perspective(PerspectiveProjection {
            fov: CAMERA_FOV_DEGREES.to_radians(),
            near: CAMERA_NEAR,
            far: CAMERA_FAR,
            ..default()
        }),
        Transform::from_translation(CAMERA_START).looking_at(Vec3::ZERO, Vec3::Y),
        OrbitControls::new(CAMERA_START, Vec3::ZERO).with_damping(CONTROLS_DAMPING),
    ));
    info!(
        "[promptscene sandbox] Stage ready (root {:?}, grid {:?})",
        baseline.stage, baseline.grid
    );
}

fn announce_ready(mut announced: ResMut<ReadyAnnounced>, channels: Res<SandboxChannels>) {
    if announced.0 {
        return;
    }
    announced.0 = true;
    channels.send(SandboxMessage::Ready);
}

/// Drains host messages in arrival order, each to completion. An outstanding
/// screenshot holds the rest of the queue until it resolves.
fn pump_host_messages(world: &mut World) {
    loop {
        if world.resource::<PendingCapture>().is_waiting() {
            return;
        }
        let next = world.resource::<SandboxChannels>().inbound.try_recv();
        let text = match next {
            Ok(text) => text,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
        };
        match HostMessage::decode(&text) {
            Ok(message) => handle_host_message(world, message),
            Err(e) => warn!("[promptscene sandbox] {e}"),
        }
    }
}

pub(crate) fn handle_host_message(world: &mut World, message: HostMessage) {
    match message {
        HostMessage::RunCode { code, request_id } => {
            let loader = world.resource::<CodeLoader>().clone();
            let reply = match loader.run(world, &code) {
                Ok(summary) => {
                    info!(
                        "[promptscene sandbox] Run complete: {} nodes spawned, {} disposed",
                        summary.spawned, summary.disposed.nodes
                    );
                    SandboxMessage::Done { request_id }
                }
                Err(e) => {
                    warn!("[promptscene sandbox] Run failed ({:?}): {}", e.kind, e.message);
                    SandboxMessage::Error {
                        message: e.message,
                        request_id,
                    }
                }
            };
            world.resource::<SandboxChannels>().send(reply);
        }
        HostMessage::GetScreenshot { request_id } => {
            if let Err(message) = capture::begin_capture(world, request_id) {
                world
                    .resource::<SandboxChannels>()
                    .send(SandboxMessage::Error {
                        message,
                        request_id,
                    });
            }
        }
        HostMessage::ResetCamera => controls::reset_stage_camera(world),
        HostMessage::ToggleAutoRotate { value } => {
            world.resource_mut::<ViewOptions>().auto_rotate = value;
        }
        HostMessage::ToggleWireframe { value } => {
            world.resource_mut::<ViewOptions>().wireframe = value;
            scene::apply_wireframe(world, value);
        }
    }
}

fn auto_rotate_stage(
    options: Res<ViewOptions>,
    mut stage: Query<&mut Transform, With<StageRoot>>,
) {
    if !options.auto_rotate {
        return;
    }
    for mut transform in &mut stage {
        transform.rotate_y(AUTO_ROTATE_STEP);
    }
}

/// Size reported to scripts; falls back to 1280x720 without a window.
pub(crate) fn viewport_size(world: &mut World) -> UVec2 {
    world
        .query_filtered::<&Window, With<bevy::window::PrimaryWindow>>()
        .iter(world)
        .next()
        .map(|window| UVec2::new(window.physical_width(), window.physical_height()))
        .unwrap_or(UVec2::new(1280, 720))
}

pub(crate) fn baseline(world: &World) -> Option<Baseline> {
    world.get_resource::<Baseline>().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{self, HostEndpoint};
    use bevy::pbr::wireframe::Wireframe;
    use bevy::window::PrimaryWindow;

    const CUBE_AND_SPHERE: &str = r#"
        fn render_scene(env) {
            let three = env.renderingNamespace;
            let cube = three.mesh(three.box_geometry(1, 1, 1), three.standard_material(0xff8800));
            cube.set_position(0, 0.5, 0);
            env.scene.add(cube);
            let ball = three.mesh(three.sphere_geometry(0.5), three.basic_material(0x3366ff));
            ball.set_position(2, 0.5, 0);
            env.scene.add(ball);
        }
    "#;

    const SINGLE_TORUS: &str = r#"
        fn render_scene(env) {
            let three = env.renderingNamespace;
            env.scene.add(three.mesh(three.torus_geometry(1.0, 0.25), three.standard_material(#{ color: 0x22aa44, roughness: 0.3 })));
        }
    "#;

    fn sandbox_app() -> (App, HostEndpoint) {
        let (host, sandbox) = protocol::boundary();
        let mut app = App::new();
        register_headless_assets(&mut app);
        app.insert_resource(SandboxChannels::new(sandbox))
            .add_plugins(SandboxPlugin { interactive: false });
        app.update();
        (app, host)
    }

    fn send(host: &HostEndpoint, message: HostMessage) {
        host.outbound.send(message.encode()).expect("send");
    }

    fn drain(host: &mut HostEndpoint) -> Vec<SandboxMessage> {
        let mut out = Vec::new();
        while let Ok(text) = host.inbound.try_recv() {
            out.push(SandboxMessage::decode(&text).expect("decode"));
        }
        out
    }

    fn run(code: &str, id: u64) -> HostMessage {
        HostMessage::RunCode {
            code: code.to_string(),
            request_id: Some(id),
        }
    }

    #[test]
    fn ready_is_announced_once() {
        let (mut app, mut host) = sandbox_app();
        assert_eq!(drain(&mut host), vec![SandboxMessage::Ready]);
        app.update();
        app.update();
        assert!(drain(&mut host).is_empty());
    }

    #[test]
    fn every_run_replaces_the_previous_scene() {
        let (mut app, mut host) = sandbox_app();
        drain(&mut host);

        send(&host, run(CUBE_AND_SPHERE, 1));
        app.update();
        assert_eq!(
            drain(&mut host),
            vec![SandboxMessage::Done { request_id: Some(1) }]
        );
        assert_eq!(scene::user_node_count(app.world_mut()), 2);

        for id in 2..5 {
            send(&host, run(SINGLE_TORUS, id));
            app.update();
            assert_eq!(
                drain(&mut host),
                vec![SandboxMessage::Done { request_id: Some(id) }]
            );
            assert_eq!(scene::user_node_count(app.world_mut()), 1);
        }

        let baseline = baseline(app.world()).expect("baseline");
        let world = app.world();
        assert!(world.entities().contains(baseline.ambient));
        assert!(world.entities().contains(baseline.directional));
        assert!(world.entities().contains(baseline.grid));
        // grid + torus
        assert_eq!(world.resource::<Assets<Mesh>>().len(), 2);
        assert_eq!(world.resource::<Assets<StandardMaterial>>().len(), 2);
    }

    #[test]
    fn module_without_entry_point_errors_and_leaves_baseline_only() {
        let (mut app, mut host) = sandbox_app();
        drain(&mut host);
        send(&host, run(CUBE_AND_SPHERE, 1));
        app.update();
        drain(&mut host);

        send(&host, run("let x = 1;", 2));
        app.update();
        let replies = drain(&mut host);
        assert_eq!(replies.len(), 1);
        match &replies[0] {
            SandboxMessage::Error {
                message,
                request_id,
            } => {
                assert!(message.contains("render_scene"), "{message}");
                assert_eq!(*request_id, Some(2));
            }
            other => panic!("expected ERROR, got {other:?}"),
        }
        assert_eq!(scene::user_node_count(app.world_mut()), 0);
        assert_eq!(app.world().resource::<Assets<Mesh>>().len(), 1);
    }

    #[test]
    fn runtime_errors_keep_their_message() {
        let (mut app, mut host) = sandbox_app();
        drain(&mut host);
        send(
            &host,
            run(r#"fn render_scene(env) { throw "no teapots today"; }"#, 9),
        );
        app.update();
        match drain(&mut host).pop() {
            Some(SandboxMessage::Error { message, .. }) => {
                assert!(message.contains("no teapots today"), "{message}")
            }
            other => panic!("expected ERROR, got {other:?}"),
        }
    }

    #[test]
    fn wireframe_set_twice_stays_on_and_carries_into_new_runs() {
        let (mut app, mut host) = sandbox_app();
        drain(&mut host);
        send(&host, run(SINGLE_TORUS, 1));
        send(&host, HostMessage::ToggleWireframe { value: true });
        send(&host, HostMessage::ToggleWireframe { value: true });
        app.update();

        let world = app.world_mut();
        let grid = baseline(world).expect("baseline").grid;
        let mut wired = world.query_filtered::<Entity, (With<scene::UserNode>, With<Wireframe>)>();
        assert_eq!(wired.iter(world).count(), 1);
        assert!(world.get::<Wireframe>(grid).is_none());

        send(&host, run(CUBE_AND_SPHERE, 2));
        app.update();
        let world = app.world_mut();
        assert_eq!(wired.iter(world).count(), 2);
    }

    #[test]
    fn auto_rotate_spins_the_stage_root() {
        let (mut app, mut host) = sandbox_app();
        drain(&mut host);
        send(&host, HostMessage::ToggleAutoRotate { value: true });
        app.update();
        app.update();

        let world = app.world_mut();
        let mut stage = world.query_filtered::<&Transform, With<StageRoot>>();
        let (_, angle) = stage.single(world).rotation.to_axis_angle();
        assert!((angle - 2.0 * AUTO_ROTATE_STEP).abs() < 1e-4, "{angle}");
        assert!(drain(&mut host).is_empty());
    }

    #[test]
    fn headless_screenshot_reports_failure() {
        let (mut app, mut host) = sandbox_app();
        drain(&mut host);
        send(&host, HostMessage::GetScreenshot { request_id: Some(3) });
        app.update();
        match drain(&mut host).pop() {
            Some(SandboxMessage::Error {
                message,
                request_id,
            }) => {
                assert!(message.starts_with("Screenshot failed"), "{message}");
                assert_eq!(request_id, Some(3));
            }
            other => panic!("expected ERROR, got {other:?}"),
        }
    }

    #[test]
    fn pending_screenshot_holds_later_messages() {
        let (mut app, mut host) = sandbox_app();
        drain(&mut host);
        app.world_mut().spawn((Window::default(), PrimaryWindow));

        send(&host, HostMessage::GetScreenshot { request_id: Some(1) });
        send(&host, run(SINGLE_TORUS, 2));
        app.update();
        assert!(drain(&mut host).is_empty());
        assert_eq!(scene::user_node_count(app.world_mut()), 0);

        for _ in 0..capture::CAPTURE_FRAME_BUDGET {
            app.update();
        }
        let replies = drain(&mut host);
        assert!(matches!(
            replies.first(),
            Some(SandboxMessage::Error {
                request_id: Some(1),
                ..
            })
        ));
        app.update();
        let replies = drain(&mut host);
        assert_eq!(replies, vec![SandboxMessage::Done { request_id: Some(2) }]);
        assert_eq!(scene::user_node_count(app.world_mut()), 1);
    }

    #[test]
    fn late_frames_from_an_expired_capture_are_ignored() {
        use bevy::render::view::screenshot::{Screenshot, ScreenshotCaptured};

        let (mut app, mut host) = sandbox_app();
        drain(&mut host);
        app.world_mut().spawn((Window::default(), PrimaryWindow));
        let screenshots = |app: &mut App| -> Vec<Entity> {
            let world = app.world_mut();
            world
                .query_filtered::<Entity, With<Screenshot>>()
                .iter(world)
                .collect()
        };

        send(&host, HostMessage::GetScreenshot { request_id: Some(1) });
        app.update();
        let stale = screenshots(&mut app);
        assert_eq!(stale.len(), 1);
        for _ in 0..capture::CAPTURE_FRAME_BUDGET {
            app.update();
        }
        assert!(matches!(
            drain(&mut host).as_slice(),
            [SandboxMessage::Error {
                request_id: Some(1),
                ..
            }]
        ));
        assert!(!app.world().entities().contains(stale[0]));

        send(&host, HostMessage::GetScreenshot { request_id: Some(2) });
        app.update();
        let fresh = screenshots(&mut app);
        assert_eq!(fresh.len(), 1);

        app.world_mut()
            .trigger_targets(ScreenshotCaptured(Image::default()), stale[0]);
        assert!(drain(&mut host).is_empty());
        assert!(app.world().resource::<PendingCapture>().is_waiting());

        app.world_mut()
            .trigger_targets(ScreenshotCaptured(Image::default()), fresh[0]);
        match drain(&mut host).as_slice() {
            [SandboxMessage::Screenshot {
                data_url,
                request_id: Some(2),
            }] => assert!(data_url.starts_with("data:image/png;base64,")),
            other => panic!("expected SCREENSHOT for request 2, got {other:?}"),
        }
        assert!(!app.world().resource::<PendingCapture>().is_waiting());
    }

    #[test]
    fn reset_camera_returns_to_start() {
        let (mut app, mut host) = sandbox_app();
        drain(&mut host);
        {
            let world = app.world_mut();
            let mut cams = world.query_filtered::<&mut Transform, With<StageCamera>>();
            cams.single_mut(world).translation = Vec3::new(1.0, 2.0, 3.0);
        }
        send(&host, HostMessage::ResetCamera);
        app.update();
        let world = app.world_mut();
        let mut cams = world.query_filtered::<&Transform, With<StageCamera>>();
        assert_eq!(cams.single(world).translation, CAMERA_START);
        assert!(drain(&mut host).is_empty());
    }
}
