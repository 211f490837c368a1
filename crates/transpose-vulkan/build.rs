use std::{
    env,
    path::{Path, PathBuf},
    process::Command,
};

const SHADERS: [&str; 3] =
    ["transposition_no_bank_conflicts", "transposition_bank_conflicts", "transfer"];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=GLSLC");
    for name in SHADERS {
        println!("cargo:rerun-if-changed=shaders/{name}.comp");
    }

    let glslc = env::var("GLSLC").unwrap_or_else(|_| "glslc".to_string());
    let Some(out_dir) = env::var_os("OUT_DIR").map(PathBuf::from) else {
        return;
    };
    let spirv_dir = out_dir.join("spirv");
    if std::fs::create_dir_all(&spirv_dir).is_err() {
        return;
    }

    for name in SHADERS {
        let source = Path::new("shaders").join(format!("{name}.comp"));
        let target = spirv_dir.join(format!("{name}.spv"));
        let status = Command::new(&glslc)
            .arg("--target-env=vulkan1.1")
            .arg("-O")
            .arg(&source)
            .arg("-o")
            .arg(&target)
            .status();
        match status {
            Ok(s) if s.success() => {}
            Ok(s) => {
                println!("cargo:warning={glslc} failed on {} ({s})", source.display());
                return;
            }
            // No compiler on PATH: binaries must come from --shader-dir.
            Err(_) => return,
        }
    }

    println!("cargo:rustc-env=TRANSPOSE_SPIRV_DIR={}", spirv_dir.display());
}
