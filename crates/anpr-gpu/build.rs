use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Compiles the compute shaders to SPIR-V with `glslc` (Vulkan SDK / NDK).
///
/// Without `glslc` a stub is written instead so the crate still builds; the
/// runtime refuses to stage a stub and the GPU backend reports `ShaderLoad`.
///
/// Override the compiler via: ANPR_GLSLC=/path/to/glslc
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let shaders_dir = Path::new("shaders");
    let glslc = env::var("ANPR_GLSLC").unwrap_or_else(|_| "glslc".to_string());

    println!("cargo:rerun-if-env-changed=ANPR_GLSLC");

    for shader in ["luma_rotate"] {
        let src = shaders_dir.join(format!("{shader}.comp"));
        let spv = out_dir.join(format!("{shader}.spv"));
        println!("cargo:rerun-if-changed={}", src.display());

        let status = Command::new(&glslc)
            .args([
                "-fshader-stage=compute",
                "--target-env=vulkan1.1",
                "-O",
                "-o",
                spv.to_str().unwrap(),
                src.to_str().unwrap(),
            ])
            .status();

        match status {
            Ok(s) if s.success() => {
                println!("cargo:warning=compiled {shader}.comp → {shader}.spv");
            }
            Ok(s) => {
                eprintln!("glslc failed for {shader}.comp with status {s}, creating stub");
                std::fs::write(&spv, format!("// STUB: {shader}.comp not compiled\n")).unwrap();
            }
            Err(e) => {
                eprintln!("glslc not found ({e}), creating stub SPIR-V for {shader}.comp");
                std::fs::write(&spv, format!("// STUB: {shader}.comp not compiled (glslc not found)\n"))
                    .unwrap();
            }
        }
    }
}
