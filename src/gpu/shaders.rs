// ============================================================================
// GPU SHADERS: WGSL source kept inline
// ============================================================================

/// Draws one tile texture as an axis-aligned quad.
///
/// `rect` holds the quad's top-left and bottom-right corners in NDC; the
/// fragment stage scales the sampled alpha by `opacity` and leaves color
/// straight (non-premultiplied) for the fixed-function blend.
pub const TILE_BLIT_SHADER: &str = r#"
struct BlitUniforms {
    rect: vec4<f32>,
    opacity: f32,
    _pad0: f32,
    _pad1: f32,
    _pad2: f32,
};

@group(0) @binding(0) var<uniform> u: BlitUniforms;
@group(1) @binding(0) var tile_tex: texture_2d<f32>;
@group(1) @binding(1) var tile_samp: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_tile(@builtin(vertex_index) vi: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 6>(
        vec2<f32>(0.0, 0.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(0.0, 1.0),
        vec2<f32>(1.0, 0.0),
        vec2<f32>(1.0, 1.0),
    );
    let unit_pos = positions[vi];

    var out: VertexOutput;
    out.position = vec4<f32>(mix(u.rect.xy, u.rect.zw, unit_pos), 0.0, 1.0);
    out.uv = unit_pos;
    return out;
}

@fragment
fn fs_tile(in: VertexOutput) -> @location(0) vec4<f32> {
    let c = textureSample(tile_tex, tile_samp, in.uv);
    return vec4<f32>(c.rgb, c.a * u.opacity);
}
"#;
