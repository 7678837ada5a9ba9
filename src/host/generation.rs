use serde_json::{json, Value};
use tokio::sync::mpsc;

pub use super::error::GenerationError;

pub const SYSTEM_PROMPT: &str = r##"You are a 3D scene code-generation assistant writing Rhai scripts.
OUTPUT RULES:
- Output ONLY Rhai code. No backticks, no markdown, no commentary.
- Define exactly one entry function:
  fn render_scene(env) { ... }
- env is an object map with: renderingNamespace, scene, camera, renderer, controls, orbitControlsFactory.
- Build content with env.renderingNamespace:
  box_geometry(w, h, d), sphere_geometry(r), cylinder_geometry(r, h), cone_geometry(r, h),
  torus_geometry(major, minor), plane_geometry(w, d), capsule_geometry(r, length),
  standard_material(#{ color, roughness, metalness, emissive, opacity }), basic_material(color),
  mesh(geometry, material or [materials]), group(), point_light(color, intensity),
  spot_light(color, intensity), directional_light(color, intensity), color(r, g, b), rand(min, max), PI.
- Nodes support set_position, set_rotation, set_scale, look_at, set_name, set_cast_shadow,
  set_receive_shadow, set_visible and add(child). Add top-level nodes with env.scene.add(node).
- Colors are hex integers like 0xff8800, "#ff8800" strings, or color(r, g, b).
- camera: set_position, look_at, set_fov. renderer: set_clear_color, set_shadows, width(), height().
- controls: set_target, set_damping(enabled, factor), save_state(), reset().
- The previous scene is cleared before your code runs; an ambient light, a sun and a ground grid already exist.
- Add basic lighting and frame the subject for visibility.
- Keep it concise and readable; add minimal comments.
- Keep triangle count modest unless asked otherwise."##;

/// One call to a generation provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    pub prior_code: Option<String>,
    pub screenshot: Option<String>,
    pub model: Option<String>,
}

/// Text deltas in arrival order. The stream ends when the sender drops; an
/// `Err` item ends it early.
pub type GenerationStream = mpsc::Receiver<Result<String, GenerationError>>;

pub trait GenerationProvider: Send + Sync {
    fn generate(&self, request: GenerationRequest) -> GenerationStream;

    /// Model identifiers this provider offers.
    fn models(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Removes one enclosing code fence (with any language tag) and trims.
pub fn strip_fences(text: &str) -> String {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        let tag_len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '+'))
            .unwrap_or(rest.len());
        body = rest[tag_len..].trim_start();
    }
    if let Some(rest) = body.strip_suffix("```") {
        body = rest;
    }
    body.trim().to_string()
}

/// The user turn of a chat request: a multimodal edit when there is prior
/// code and a screenshot, a text edit with code only, otherwise a fresh scene.
pub fn user_message(request: &GenerationRequest) -> Value {
    let prompt = &request.prompt;
    match (request.prior_code.as_deref(), request.screenshot.as_deref()) {
        (Some(code), Some(screenshot)) => json!({
            "role": "user",
            "content": [
                {
                    "type": "text",
                    "text": format!(
                        "Task: Modify the existing scene per: \"{prompt}\"\n\nCurrent code:\n{code}\n\nA screenshot of the current render is attached. Please modify the code to implement the requested changes while preserving the overall structure."
                    ),
                },
                { "type": "image_url", "image_url": { "url": screenshot } },
            ],
        }),
        (Some(code), None) => json!({
            "role": "user",
            "content": format!(
                "Task: Modify the existing scene per: \"{prompt}\"\n\nCurrent code:\n{code}\n\nPlease modify the code to implement the requested changes while preserving the overall structure."
            ),
        }),
        (None, _) => json!({
            "role": "user",
            "content": format!(
                "Task: Create a 3D scene per: \"{prompt}\"\nConstraints:\n- No imports; everything comes in through env.\n- Add a ground plane, reasonable lights, and camera framing of the subject.\n- Return ONLY code for fn render_scene(env) {{ ... }}."
            ),
        }),
    }
}

pub fn chat_messages(request: &GenerationRequest) -> Value {
    json!([
        { "role": "system", "content": request.system },
        user_message(request),
    ])
}
