use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    // UI vertex shader. Matches the imgui::DrawVert layout:
    //   - binding 0, location 0: R32G32_SFLOAT (pos)
    //   - binding 0, location 1: R32G32_SFLOAT (uv)
    //   - binding 0, location 2: R8G8B8A8_UNORM (col)
    // The push constant is the orthographic projection of the display rect.
    let vs_src = r#"
#version 450
layout(location = 0) in vec2 inPos;
layout(location = 1) in vec2 inUv;
layout(location = 2) in vec4 inColor;

layout(push_constant) uniform Push { mat4 ortho; } pc;

layout(location = 0) out vec2 vUv;
layout(location = 1) out vec4 vColor;

void main() {
    vUv = inUv;
    vColor = inColor;
    gl_Position = pc.ortho * vec4(inPos, 0.0, 1.0);
}
"#;

    // Every draw command binds one combined image sampler: the font atlas or a sprite.
    let fs_src = r#"
#version 450
layout(location = 0) in vec2 vUv;
layout(location = 1) in vec4 vColor;

layout(set = 0, binding = 0) uniform sampler2D tex;

layout(location = 0) out vec4 outColor;

void main() {
    outColor = vColor * texture(tex, vUv);
}
"#;

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();

    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    let vs_spv = comp
        .compile_into_spirv(
            vs_src,
            shaderc::ShaderKind::Vertex,
            "ui.vert",
            "main",
            Some(&opts),
        )
        .unwrap();

    let fs_spv = comp
        .compile_into_spirv(
            fs_src,
            shaderc::ShaderKind::Fragment,
            "ui.frag",
            "main",
            Some(&opts),
        )
        .unwrap();

    fs::write(out.join("ui.vert.spv"), vs_spv.as_binary_u8()).unwrap();
    fs::write(out.join("ui.frag.spv"), fs_spv.as_binary_u8()).unwrap();

    println!("cargo:rerun-if-changed=build.rs");
}
