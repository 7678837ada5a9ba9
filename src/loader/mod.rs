//! Turns generated rhai source into a scene.
//!
//! Every run disposes the previous user content first, then compiles the
//! script, checks that it exports `render_scene(env)` and invokes it against a
//! staging area that is committed to the world afterwards.

mod api;
mod staging;

use bevy::prelude::*;
use rhai::{Dynamic, Engine, FnAccess, Scope, AST};
use std::cell::RefCell;
use std::rc::Rc;

use crate::sandbox::scene::{self, DisposalReport};
use crate::sandbox::{controls, ViewOptions};
use staging::Staging;

pub const ENTRY_POINT: &str = "render_scene";
pub(crate) const DEFAULT_RHAI_MAX_OPERATIONS: u64 = 2_000_000;
pub(crate) const DEFAULT_RHAI_MAX_CALL_LEVELS: usize = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    Syntax,
    Runtime,
    InvalidModule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    pub kind: LoadErrorKind,
    pub message: String,
}

impl LoadError {
    fn new(kind: LoadErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for LoadError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub disposed: DisposalReport,
    pub spawned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLimits {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_RHAI_MAX_OPERATIONS,
            max_call_levels: DEFAULT_RHAI_MAX_CALL_LEVELS,
            max_string_size: 1 << 20,
            max_array_size: 100_000,
            max_map_size: 10_000,
        }
    }
}

impl ScriptLimits {
    pub fn from_env() -> Self {
        let max_operations = std::env::var("PROMPTSCENE_RHAI_MAX_OPERATIONS")
            .ok()
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RHAI_MAX_OPERATIONS)
            .max(10_000);
        let max_call_levels = std::env::var("PROMPTSCENE_RHAI_MAX_CALL_LEVELS")
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(DEFAULT_RHAI_MAX_CALL_LEVELS)
            .max(8);
        Self {
            max_operations,
            max_call_levels,
            ..Default::default()
        }
    }
}

#[derive(Resource, Clone, Debug, Default)]
pub struct CodeLoader {
    limits: ScriptLimits,
}

impl CodeLoader {
    pub fn new(limits: ScriptLimits) -> Self {
        Self { limits }
    }

    pub fn from_env() -> Self {
        Self::new(ScriptLimits::from_env())
    }

    /// Disposes, loads and invokes `code`. Staged edits are committed even
    /// when the script fails part way.
    pub fn run(&self, world: &mut World, code: &str) -> Result<RunSummary, LoadError> {
        let disposed = scene::dispose_user_nodes(world);
        if code.trim().is_empty() {
            return Ok(RunSummary {
                disposed,
                spawned: 0,
            });
        }
        let Some(baseline) = crate::sandbox::baseline(world) else {
            return Err(LoadError::new(
                LoadErrorKind::Runtime,
                "Stage is not initialised",
            ));
        };

        let staging = Rc::new(RefCell::new(Staging::new(crate::sandbox::viewport_size(
            world,
        ))));
        let outcome = self.invoke(code, &staging);
        let staged = std::mem::take(&mut *staging.borrow_mut());
        let spawned = staged.commit(world, &baseline);

        if world.resource::<ViewOptions>().wireframe {
            scene::apply_wireframe(world, true);
        }
        outcome?;
        controls::reset_stage_camera(world);
        Ok(RunSummary { disposed, spawned })
    }

    fn invoke(&self, code: &str, staging: &api::SharedStaging) -> Result<(), LoadError> {
        let engine = self.engine();
        let ast = engine
            .compile(code)
            .map_err(|e| LoadError::new(LoadErrorKind::Syntax, e.to_string()))?;
        ensure_entry_point(&ast)?;

        let mut scope = Scope::new();
        let env = api::environment(staging);
        engine
            .call_fn::<Dynamic>(&mut scope, &ast, ENTRY_POINT, (env,))
            .map(|_| ())
            .map_err(|e| LoadError::new(LoadErrorKind::Runtime, e.to_string()))
    }

    fn engine(&self) -> Engine {
        let mut engine = Engine::new();
        engine.set_module_resolver(rhai::module_resolvers::DummyModuleResolver::new());
        engine.disable_symbol("eval");
        engine.set_max_operations(self.limits.max_operations);
        engine.set_max_call_levels(self.limits.max_call_levels);
        engine.set_max_string_size(self.limits.max_string_size);
        engine.set_max_array_size(self.limits.max_array_size);
        engine.set_max_map_size(self.limits.max_map_size);
        engine.on_print(|text| info!("[promptscene script] {text}"));
        engine.on_debug(|text, _source, pos| debug!("[promptscene script] {pos:?} {text}"));
        api::register_all(&mut engine);
        engine
    }
}

fn ensure_entry_point(ast: &AST) -> Result<(), LoadError> {
    let exported = ast.iter_functions().any(|f| {
        f.name == ENTRY_POINT && f.params.len() == 1 && f.access == FnAccess::Public
    });
    if exported {
        Ok(())
    } else {
        Err(LoadError::new(
            LoadErrorKind::InvalidModule,
            format!("Module does not export a {ENTRY_POINT}(env) function"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::controls::{OrbitControls, StageCamera};
    use crate::sandbox::{self, SandboxChannels, SandboxPlugin};

    fn stage_app() -> App {
        let (_host, endpoint) = crate::protocol::boundary();
        let mut app = App::new();
        sandbox::register_headless_assets(&mut app);
        app.insert_resource(SandboxChannels::new(endpoint))
            .add_plugins(SandboxPlugin { interactive: false });
        app.update();
        app
    }

    fn loader() -> CodeLoader {
        CodeLoader::new(ScriptLimits {
            max_operations: 50_000,
            ..Default::default()
        })
    }

    #[test]
    fn syntax_errors_are_classified() {
        let mut app = stage_app();
        let err = loader()
            .run(app.world_mut(), "fn render_scene(env) { let = ; }")
            .expect_err("syntax error");
        assert_eq!(err.kind, LoadErrorKind::Syntax);
    }

    #[test]
    fn wrong_arity_entry_is_not_a_module() {
        let mut app = stage_app();
        let err = loader()
            .run(app.world_mut(), "fn render_scene() { }")
            .expect_err("invalid module");
        assert_eq!(err.kind, LoadErrorKind::InvalidModule);

        let err = loader()
            .run(app.world_mut(), "private fn render_scene(env) { }")
            .expect_err("invalid module");
        assert_eq!(err.kind, LoadErrorKind::InvalidModule);
    }

    #[test]
    fn entry_check_happens_before_top_level_code() {
        let mut app = stage_app();
        let err = loader()
            .run(app.world_mut(), "throw \"top level ran\";")
            .expect_err("invalid module");
        assert_eq!(err.kind, LoadErrorKind::InvalidModule);
    }

    #[test]
    fn runaway_scripts_hit_the_operation_budget() {
        let mut app = stage_app();
        let err = loader()
            .run(app.world_mut(), "fn render_scene(env) { loop { } }")
            .expect_err("budget");
        assert_eq!(err.kind, LoadErrorKind::Runtime);
    }

    #[test]
    fn imports_cannot_reach_the_filesystem() {
        let mut app = stage_app();
        let err = loader()
            .run(
                app.world_mut(),
                "import \"secrets\" as s; fn render_scene(env) { }",
            )
            .expect_err("no modules");
        assert_eq!(err.kind, LoadErrorKind::Runtime);
    }

    #[test]
    fn partial_work_is_kept_when_the_script_throws() {
        let mut app = stage_app();
        let code = r#"
            fn render_scene(env) {
                let three = env.renderingNamespace;
                env.scene.add(three.group());
                throw "halfway";
            }
        "#;
        let err = loader().run(app.world_mut(), code).expect_err("throws");
        assert_eq!(err.kind, LoadErrorKind::Runtime);
        assert_eq!(scene::user_node_count(app.world_mut()), 1);
    }

    #[test]
    fn nested_groups_spawn_under_the_stage() {
        let mut app = stage_app();
        let code = r#"
            fn render_scene(env) {
                let three = env.renderingNamespace;
                let rig = three.group();
                let lamp = three.point_light(0xffeeaa, 1.5);
                lamp.set_position(0, 3, 0);
                rig.add(lamp);
                rig.add(three.mesh(three.cylinder_geometry(0.1, 3), three.standard_material(0x444444)));
                env.scene.add(rig);
            }
        "#;
        let summary = loader().run(app.world_mut(), code).expect("run");
        assert_eq!(summary.spawned, 3);
        let world = app.world_mut();
        let mut lights = world.query::<(&PointLight, &Parent)>();
        let (_, parent) = lights.single(world);
        assert!(world.get::<scene::UserNode>(parent.get()).is_some());
    }

    #[test]
    fn deep_chains_stop_at_the_depth_cap() {
        let mut app = stage_app();
        let code = r#"
            fn render_scene(env) {
                let three = env.renderingNamespace;
                let tip = three.group();
                env.scene.add(tip);
                for i in 0..10000 {
                    let next = three.group();
                    tip.add(next);
                    tip = next;
                }
            }
        "#;
        let err = loader().run(app.world_mut(), code).expect_err("too deep");
        assert_eq!(err.kind, LoadErrorKind::Runtime);
        assert!(err.message.contains("256"), "{}", err.message);
        assert_eq!(
            scene::user_node_count(app.world_mut()),
            staging::MAX_NODE_DEPTH
        );

        let summary = loader().run(app.world_mut(), "").expect("blank");
        assert_eq!(summary.disposed.nodes, staging::MAX_NODE_DEPTH);
    }

    #[test]
    fn successful_runs_reset_the_controls_to_their_saved_pose() {
        let mut app = stage_app();
        let code = r#"
            fn render_scene(env) {
                env.camera.set_position(0, 4, 12);
                env.controls.set_target(0, 1, 0);
                env.controls.save_state();
                env.camera.set_position(1, 1, 1);
            }
        "#;
        loader().run(app.world_mut(), code).expect("run");
        let world = app.world_mut();
        let mut cams = world.query_filtered::<(&Transform, &OrbitControls), With<StageCamera>>();
        let (transform, controls) = cams.single(world);
        assert_eq!(transform.translation, Vec3::new(0.0, 4.0, 12.0));
        assert_eq!(controls.target, Vec3::Y);
    }

    #[test]
    fn blank_code_only_clears() {
        let mut app = stage_app();
        loader()
            .run(
                app.world_mut(),
                "fn render_scene(env) { env.scene.add(env.renderingNamespace.group()); }",
            )
            .expect("run");
        let summary = loader().run(app.world_mut(), "   ").expect("blank");
        assert_eq!(summary.disposed.nodes, 1);
        assert_eq!(scene::user_node_count(app.world_mut()), 0);
    }
}
