use bevy::prelude::{Color, EulerRot, Quat, Srgba, Vec3};
use rand::Rng;
use rhai::{Dynamic, Engine, EvalAltResult, Map, FLOAT, INT};
use std::cell::RefCell;
use std::rc::Rc;

use super::staging::{GeometrySpec, MaterialSpec, NodeKind, Staging, StageOp};
use crate::sandbox::scene::hex_color;

pub(crate) type SharedStaging = Rc<RefCell<Staging>>;
type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

#[derive(Clone)]
pub(crate) struct Namespace(SharedStaging);

#[derive(Clone, Copy)]
pub(crate) struct GeometryHandle(usize);

#[derive(Clone, Copy)]
pub(crate) struct MaterialHandle(usize);

#[derive(Clone, Copy)]
pub(crate) struct ColorValue(Color);

#[derive(Clone)]
pub(crate) struct NodeHandle {
    id: usize,
    staging: SharedStaging,
}

#[derive(Clone)]
pub(crate) struct SceneHandle(SharedStaging);

#[derive(Clone)]
pub(crate) struct CameraHandle(SharedStaging);

#[derive(Clone)]
pub(crate) struct RendererHandle(SharedStaging);

#[derive(Clone)]
pub(crate) struct ControlsHandle(SharedStaging);

#[derive(Clone)]
pub(crate) struct ControlsFactory(SharedStaging);

/// The single argument handed to `render_scene`.
pub(crate) fn environment(staging: &SharedStaging) -> Map {
    let mut env = Map::new();
    env.insert(
        "renderingNamespace".into(),
        Dynamic::from(Namespace(staging.clone())),
    );
    env.insert("scene".into(), Dynamic::from(SceneHandle(staging.clone())));
    env.insert("camera".into(), Dynamic::from(CameraHandle(staging.clone())));
    env.insert(
        "renderer".into(),
        Dynamic::from(RendererHandle(staging.clone())),
    );
    env.insert(
        "controls".into(),
        Dynamic::from(ControlsHandle(staging.clone())),
    );
    env.insert(
        "orbitControlsFactory".into(),
        Dynamic::from(ControlsFactory(staging.clone())),
    );
    env
}

fn number(value: &Dynamic) -> ScriptResult<f32> {
    if let Ok(v) = value.as_float() {
        return Ok(v as f32);
    }
    if let Ok(v) = value.as_int() {
        return Ok(v as f32);
    }
    Err(format!("expected a number, got {}", value.type_name()).into())
}

fn vec3(x: &Dynamic, y: &Dynamic, z: &Dynamic) -> ScriptResult<Vec3> {
    Ok(Vec3::new(number(x)?, number(y)?, number(z)?))
}

/// Accepts `0xrrggbb`, `"#rrggbb"` or a value from `color(r, g, b)`.
fn color(value: &Dynamic) -> ScriptResult<Color> {
    if let Ok(hex) = value.as_int() {
        if !(0..=0xff_ffff).contains(&hex) {
            return Err(format!("color {hex:#x} is out of range").into());
        }
        return Ok(hex_color(hex as u32));
    }
    if let Some(value) = value.clone().try_cast::<ColorValue>() {
        return Ok(value.0);
    }
    if value.is_string() {
        let text = value.clone().into_string().unwrap_or_default();
        return Srgba::hex(text.trim())
            .map(Color::from)
            .map_err(|e| format!("invalid color '{text}': {e}").into());
    }
    Err(format!("expected a color, got {}", value.type_name()).into())
}

fn material_from_options(value: &Dynamic) -> ScriptResult<MaterialSpec> {
    let mut spec = MaterialSpec::default();
    let Some(options) = value.clone().try_cast::<Map>() else {
        spec.color = color(value)?;
        return Ok(spec);
    };
    for (key, value) in options.iter() {
        match key.as_str() {
            "color" => spec.color = color(value)?,
            "emissive" => spec.emissive = color(value)?,
            "roughness" => spec.roughness = number(value)?,
            "metalness" => spec.metalness = number(value)?,
            "opacity" => spec.opacity = number(value)?,
            // Fields we cannot honour are ignored.
            _ => {}
        }
    }
    Ok(spec)
}

fn ns_geometry(ns: &Namespace, spec: GeometrySpec) -> GeometryHandle {
    GeometryHandle(ns.0.borrow_mut().add_geometry(spec))
}

fn ns_node(ns: &Namespace, kind: NodeKind) -> NodeHandle {
    let id = ns.0.borrow_mut().add_node(kind);
    NodeHandle {
        id,
        staging: ns.0.clone(),
    }
}

fn ns_mesh(
    ns: &mut Namespace,
    geometry: GeometryHandle,
    materials: Dynamic,
) -> ScriptResult<NodeHandle> {
    let slots = if materials.is_array() {
        materials
            .into_array()
            .unwrap_or_default()
            .into_iter()
            .map(|m| {
                m.try_cast::<MaterialHandle>()
                    .map(|m| m.0)
                    .ok_or_else(|| Box::<EvalAltResult>::from("mesh materials must be materials"))
            })
            .collect::<ScriptResult<Vec<_>>>()?
    } else if let Some(material) = materials.clone().try_cast::<MaterialHandle>() {
        vec![material.0]
    } else {
        return Err(format!("expected a material, got {}", materials.type_name()).into());
    };
    Ok(ns_node(
        ns,
        NodeKind::Mesh {
            geometry: geometry.0,
            materials: slots,
        },
    ))
}

fn light_args(c: &Dynamic, i: &Dynamic) -> ScriptResult<(Color, f32)> {
    Ok((color(c)?, number(i)?))
}

fn ns_rand(min: &Dynamic, max: &Dynamic) -> ScriptResult<FLOAT> {
    let (min, max) = (number(min)? as f64, number(max)? as f64);
    if !min.is_finite() || !max.is_finite() {
        return Err("rand bounds must be finite".into());
    }
    if max <= min {
        return Ok(min as FLOAT);
    }
    Ok(rand::thread_rng().gen_range(min..max) as FLOAT)
}

impl NodeHandle {
    fn edit<R>(&self, f: impl FnOnce(&mut super::staging::NodeSpec) -> R) -> R {
        let mut staging = self.staging.borrow_mut();
        f(staging.node_mut(self.id))
    }
}

fn push_op(staging: &SharedStaging, op: StageOp) {
    staging.borrow_mut().ops.push(op);
}

fn register_namespace(engine: &mut Engine) {
    engine
        .register_type_with_name::<Namespace>("RenderingNamespace")
        .register_type_with_name::<GeometryHandle>("Geometry")
        .register_type_with_name::<MaterialHandle>("Material")
        .register_type_with_name::<ColorValue>("Color")
        .register_get("PI", |_: &mut Namespace| std::f64::consts::PI as FLOAT);

    engine.register_fn(
        "box_geometry",
        |ns: &mut Namespace, w: Dynamic, h: Dynamic, d: Dynamic| -> ScriptResult<_> {
            Ok(ns_geometry(ns, GeometrySpec::Cuboid(vec3(&w, &h, &d)?)))
        },
    );
    engine.register_fn("sphere_geometry", |ns: &mut Namespace, r: Dynamic| -> ScriptResult<_> {
        let radius = number(&r)?;
        Ok(ns_geometry(ns, GeometrySpec::Sphere { radius }))
    });
    engine.register_fn(
        "cylinder_geometry",
        |ns: &mut Namespace, r: Dynamic, h: Dynamic| -> ScriptResult<_> {
            let (radius, height) = (number(&r)?, number(&h)?);
            Ok(ns_geometry(ns, GeometrySpec::Cylinder { radius, height }))
        },
    );
    engine.register_fn(
        "cone_geometry",
        |ns: &mut Namespace, r: Dynamic, h: Dynamic| -> ScriptResult<_> {
            let (radius, height) = (number(&r)?, number(&h)?);
            Ok(ns_geometry(ns, GeometrySpec::Cone { radius, height }))
        },
    );
    engine.register_fn(
        "torus_geometry",
        |ns: &mut Namespace, a: Dynamic, b: Dynamic| -> ScriptResult<_> {
            let (major, minor) = (number(&a)?, number(&b)?);
            Ok(ns_geometry(ns, GeometrySpec::Torus { major, minor }))
        },
    );
    engine.register_fn(
        "plane_geometry",
        |ns: &mut Namespace, w: Dynamic, d: Dynamic| -> ScriptResult<_> {
            let (width, depth) = (number(&w)?, number(&d)?);
            Ok(ns_geometry(ns, GeometrySpec::Plane { width, depth }))
        },
    );
    engine.register_fn(
        "capsule_geometry",
        |ns: &mut Namespace, r: Dynamic, l: Dynamic| -> ScriptResult<_> {
            let (radius, length) = (number(&r)?, number(&l)?);
            Ok(ns_geometry(ns, GeometrySpec::Capsule { radius, length }))
        },
    );

    engine.register_fn(
        "standard_material",
        |ns: &mut Namespace, options: Dynamic| -> ScriptResult<_> {
            let spec = material_from_options(&options)?;
            Ok(MaterialHandle(ns.0.borrow_mut().add_material(spec)))
        },
    );
    engine.register_fn("standard_material", |ns: &mut Namespace| {
        MaterialHandle(ns.0.borrow_mut().add_material(MaterialSpec::default()))
    });
    engine.register_fn("basic_material", |ns: &mut Namespace, c: Dynamic| -> ScriptResult<_> {
        let spec = MaterialSpec {
            unlit: true,
            ..material_from_options(&c)?
        };
        Ok(MaterialHandle(ns.0.borrow_mut().add_material(spec)))
    });

    engine.register_fn("mesh", ns_mesh);
    engine.register_fn("group", |ns: &mut Namespace| ns_node(ns, NodeKind::Group));
    engine.register_fn(
        "point_light",
        |ns: &mut Namespace, c: Dynamic, i: Dynamic| -> ScriptResult<_> {
            let (color, intensity) = light_args(&c, &i)?;
            Ok(ns_node(ns, NodeKind::PointLight { color, intensity }))
        },
    );
    engine.register_fn(
        "spot_light",
        |ns: &mut Namespace, c: Dynamic, i: Dynamic| -> ScriptResult<_> {
            let (color, intensity) = light_args(&c, &i)?;
            Ok(ns_node(ns, NodeKind::SpotLight { color, intensity }))
        },
    );
    engine.register_fn(
        "directional_light",
        |ns: &mut Namespace, c: Dynamic, i: Dynamic| -> ScriptResult<_> {
            let (color, intensity) = light_args(&c, &i)?;
            Ok(ns_node(ns, NodeKind::DirectionalLight { color, intensity }))
        },
    );
    engine.register_fn(
        "color",
        |_: &mut Namespace, r: Dynamic, g: Dynamic, b: Dynamic| -> ScriptResult<_> {
            Ok(ColorValue(Color::srgb(number(&r)?, number(&g)?, number(&b)?)))
        },
    );
    engine.register_fn("rand", |_: &mut Namespace, min: Dynamic, max: Dynamic| {
        ns_rand(&min, &max)
    });
}

fn register_nodes(engine: &mut Engine) {
    engine.register_type_with_name::<NodeHandle>("Node");

    engine.register_fn(
        "set_position",
        |node: &mut NodeHandle, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<()> {
            let position = vec3(&x, &y, &z)?;
            node.edit(|spec| spec.transform.translation = position);
            Ok(())
        },
    );
    engine.register_fn(
        "set_rotation",
        |node: &mut NodeHandle, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<()> {
            let euler = vec3(&x, &y, &z)?;
            node.edit(|spec| {
                spec.transform.rotation =
                    Quat::from_euler(EulerRot::XYZ, euler.x, euler.y, euler.z);
                spec.aimed = true;
            });
            Ok(())
        },
    );
    engine.register_fn("set_scale", |node: &mut NodeHandle, s: Dynamic| -> ScriptResult<()> {
        let s = number(&s)?;
        node.edit(|spec| spec.transform.scale = Vec3::splat(s));
        Ok(())
    });
    engine.register_fn(
        "set_scale",
        |node: &mut NodeHandle, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<()> {
            let scale = vec3(&x, &y, &z)?;
            node.edit(|spec| spec.transform.scale = scale);
            Ok(())
        },
    );
    engine.register_fn(
        "look_at",
        |node: &mut NodeHandle, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<()> {
            let target = vec3(&x, &y, &z)?;
            node.edit(|spec| spec.look_at(target));
            Ok(())
        },
    );
    engine.register_fn("set_name", |node: &mut NodeHandle, name: &str| {
        let name = name.to_string();
        node.edit(|spec| spec.name = Some(name));
    });
    engine.register_fn("set_cast_shadow", |node: &mut NodeHandle, on: bool| {
        node.edit(|spec| spec.cast_shadow = on);
    });
    engine.register_fn("set_receive_shadow", |node: &mut NodeHandle, on: bool| {
        node.edit(|spec| spec.receive_shadow = on);
    });
    engine.register_fn("set_visible", |node: &mut NodeHandle, on: bool| {
        node.edit(|spec| spec.visible = on);
    });
    engine.register_fn("add", |parent: &mut NodeHandle, child: NodeHandle| -> ScriptResult<()> {
        parent
            .staging
            .borrow_mut()
            .add_child(parent.id, child.id)
            .map_err(Into::into)
    });
}

fn register_stage(engine: &mut Engine) {
    engine
        .register_type_with_name::<SceneHandle>("Scene")
        .register_type_with_name::<CameraHandle>("Camera")
        .register_type_with_name::<RendererHandle>("Renderer")
        .register_type_with_name::<ControlsHandle>("OrbitControls")
        .register_type_with_name::<ControlsFactory>("OrbitControlsFactory");

    engine.register_fn("add", |scene: &mut SceneHandle, node: NodeHandle| {
        scene.0.borrow_mut().add_to_scene(node.id);
    });
    engine.register_fn("set_background", |scene: &mut SceneHandle, c: Dynamic| -> ScriptResult<()> {
        push_op(&scene.0, StageOp::ClearColor(color(&c)?));
        Ok(())
    });

    engine.register_fn(
        "set_position",
        |camera: &mut CameraHandle, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<()> {
            push_op(&camera.0, StageOp::CameraPosition(vec3(&x, &y, &z)?));
            Ok(())
        },
    );
    engine.register_fn(
        "look_at",
        |camera: &mut CameraHandle, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<()> {
            push_op(&camera.0, StageOp::CameraLookAt(vec3(&x, &y, &z)?));
            Ok(())
        },
    );
    engine.register_fn(
        "set_fov",
        |camera: &mut CameraHandle, degrees: Dynamic| -> ScriptResult<()> {
            push_op(&camera.0, StageOp::CameraFov(number(&degrees)?));
            Ok(())
        },
    );

    engine.register_fn(
        "set_clear_color",
        |renderer: &mut RendererHandle, c: Dynamic| -> ScriptResult<()> {
            push_op(&renderer.0, StageOp::ClearColor(color(&c)?));
            Ok(())
        },
    );
    engine.register_fn("set_shadows", |renderer: &mut RendererHandle, on: bool| {
        push_op(&renderer.0, StageOp::Shadows(on));
    });
    engine.register_fn("width", |renderer: &mut RendererHandle| {
        renderer.0.borrow().viewport.x as INT
    });
    engine.register_fn("height", |renderer: &mut RendererHandle| {
        renderer.0.borrow().viewport.y as INT
    });

    engine.register_fn(
        "set_target",
        |controls: &mut ControlsHandle, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<()> {
            push_op(&controls.0, StageOp::ControlsTarget(vec3(&x, &y, &z)?));
            Ok(())
        },
    );
    engine.register_fn(
        "set_damping",
        |controls: &mut ControlsHandle, enabled: bool, factor: Dynamic| -> ScriptResult<()> {
            let factor = number(&factor)?;
            push_op(&controls.0, StageOp::ControlsDamping { enabled, factor });
            Ok(())
        },
    );
    engine.register_fn("save_state", |controls: &mut ControlsHandle| {
        push_op(&controls.0, StageOp::ControlsSaveState);
    });
    engine.register_fn("reset", |controls: &mut ControlsHandle| {
        push_op(&controls.0, StageOp::ControlsReset);
    });

    // There is one camera, so every factory call hands back controls bound to it.
    engine.register_fn("create", |factory: &mut ControlsFactory, _camera: CameraHandle| {
        ControlsHandle(factory.0.clone())
    });
}

pub(crate) fn register_all(engine: &mut Engine) {
    register_namespace(engine);
    register_nodes(engine);
    register_stage(engine);
}
