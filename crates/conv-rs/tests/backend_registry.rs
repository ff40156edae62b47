use conv_rs::backend::registry::{create_backend, create_backend_of_kind, has_backend, list_backends};
use conv_rs::backend::BackendKind;
use conv_rs::nn::layers::{Conv2d, Conv2dConfig};

#[test]
fn cpu_backend_is_registered_under_both_names() {
    // Ensure backends are registered (auto-registration via .init_array)
    conv_rs_backend_ref_cpu::register_cpu_backend();

    let backends = list_backends();
    assert!(has_backend("cpu"), "cpu backend not registered");
    assert!(backends.contains(&"cpu".to_string()));
    assert!(backends.contains(&"cpu-reference".to_string()));

    let cpu = create_backend("cpu").expect("failed to create cpu backend");
    assert_eq!(cpu.backend_name(), "cpu");
    assert_eq!(cpu.kind(), BackendKind::Reference);
    let alias = create_backend("cpu-reference").expect("alias registered");
    assert_eq!(alias.backend_name(), "cpu");

    let reference = create_backend_of_kind(BackendKind::Reference).expect("reference backend");
    assert_eq!(reference.kind(), BackendKind::Reference);

    assert!(!has_backend("nonexistent"));
    assert!(create_backend("nonexistent").is_none());
}

#[test]
fn layer_resolves_backend_by_name() {
    conv_rs_backend_ref_cpu::register_cpu_backend();

    let conv = Conv2d::from_registry(Conv2dConfig::new(2, [3, 3]), "cpu").unwrap();
    assert_eq!(conv.backend().backend_name(), "cpu");

    let err = Conv2d::from_registry(Conv2dConfig::new(2, [3, 3]), "tpu").unwrap_err();
    assert!(err.to_string().contains("'tpu' is not registered"), "{err}");
}

#[test]
fn layer_from_env_uses_default_backend() {
    conv_rs_backend_ref_cpu::register_cpu_backend();
    if std::env::var_os("CONVRS_BACKEND").is_some() {
        return;
    }
    let conv = Conv2d::from_env(Conv2dConfig::new(1, [1, 1])).unwrap();
    assert_eq!(conv.backend().backend_name(), "cpu");
}
