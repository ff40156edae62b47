conv_rs_backend_tests::define_backend_tests!(cpu_backend, || Arc::new(
    conv_rs_backend_ref_cpu::CpuMatMulBackend::new()
));
