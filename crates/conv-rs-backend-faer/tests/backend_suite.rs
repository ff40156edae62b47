conv_rs_backend_tests::define_backend_tests!(faer_backend, || Arc::new(
    conv_rs_backend_faer::FaerMatMulBackend::new()
));

conv_rs_backend_tests::define_backend_tests!(faer_backend_sequential, || Arc::new(
    conv_rs_backend_faer::FaerMatMulBackend::sequential()
));
