pub mod cpu;

pub use cpu::CpuMatMulBackend;

/// Register the reference backend with the global backend registry.
///
/// Called automatically via a static initializer, but can also be called manually to ensure
/// the backend is registered. The backend is registered under both "cpu" and "cpu-reference".
pub fn register_cpu_backend() {
    conv_rs::backend::registry::register_matmul_backend("cpu", CpuMatMulBackend::new);
    conv_rs::backend::registry::register_matmul_backend("cpu-reference", CpuMatMulBackend::new);
}

// Auto-register on library load
#[cfg(not(target_family = "wasm"))]
#[used]
#[link_section = ".init_array"]
static REGISTER_CPU_BACKEND: extern "C" fn() = {
    extern "C" fn register() {
        register_cpu_backend();
    }
    register
};
