use std::fmt::Write;
use wgpu::{Device, ShaderModule, ShaderModuleDescriptor, ShaderSource};

const COMMON: &str = include_str!("common.wgsl");

/// Load a shader by concatenating shared includes with a main shader source.
pub fn load_shader(device: &Device, label: &str, includes: &[&str], main_source: &str) -> ShaderModule {
    let mut combined = String::new();
    for include in includes {
        combined.push_str(include);
        combined.push('\n');
    }
    combined.push_str(main_source);
    device.create_shader_module(ShaderModuleDescriptor {
        label: Some(label),
        source: ShaderSource::Wgsl(combined.into()),
    })
}

/// Load a shader that only needs common.wgsl.
pub fn load_with_common(device: &Device, label: &str, main_source: &str) -> ShaderModule {
    load_shader(device, label, &[COMMON], main_source)
}

/// Load a shader with a generated `const` block ahead of common.wgsl.
pub fn load_with_constants(
    device: &Device,
    label: &str,
    constants: &[(&str, u32)],
    main_source: &str,
) -> ShaderModule {
    let header = u32_constants(constants);
    load_shader(device, label, &[&header, COMMON], main_source)
}

pub fn u32_constants(constants: &[(&str, u32)]) -> String {
    let mut out = String::new();
    for (name, value) in constants {
        // Writing into a String cannot fail.
        let _ = writeln!(out, "const {name}: u32 = {value}u;");
    }
    out
}
