pub mod common;
pub mod parity;
pub mod recording_backend;
pub mod smoke;

/// Expands to a `#[cfg(test)]` module running the shared suite against one backend.
///
/// `$backend_ctor` is called once per test and must return `Arc<B>` for some
/// `B: MatMulBackend + 'static`.
#[macro_export]
macro_rules! define_backend_tests {
    ($module:ident, $backend_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            use std::sync::Arc;

            use $crate::{parity, smoke};

            macro_rules! backend_test {
                ($name:ident, $func:path) => {
                    #[test]
                    fn $name() {
                        let backend = ($backend_ctor)();
                        $func(&backend);
                    }
                };
            }

            backend_test!(smoke_gemm_matches_expected, smoke::gemm_matches_expected);
            backend_test!(smoke_gemm_adds_bias_per_column, smoke::gemm_adds_bias_per_column);
            backend_test!(smoke_gemm_overwrites_output, smoke::gemm_overwrites_output);
            backend_test!(smoke_gemm_rejects_shape_mismatch, smoke::gemm_rejects_shape_mismatch);
            backend_test!(smoke_conv_valid_all_ones_kernel, smoke::conv_valid_all_ones_kernel);
            backend_test!(smoke_conv_same_preserves_extent, smoke::conv_same_preserves_extent);
            backend_test!(smoke_conv_same_strided, smoke::conv_same_strided);
            backend_test!(smoke_conv_identity_kernel_copies_input, smoke::conv_identity_kernel_copies_input);
            backend_test!(smoke_conv_kernel_larger_than_input_fails, smoke::conv_kernel_larger_than_input_fails);
            backend_test!(smoke_layer_issues_one_gemm_per_call, smoke::layer_issues_one_gemm_per_call);
            backend_test!(parity_conv_matches_direct_k3_s1_valid, parity::conv_matches_direct_k3_s1_valid);
            backend_test!(parity_conv_matches_direct_k3x5_s2x1_same, parity::conv_matches_direct_k3x5_s2x1_same);
            backend_test!(parity_conv_matches_direct_k2_s1_same, parity::conv_matches_direct_k2_s1_same);
            backend_test!(parity_conv_matches_direct_k1_s2_valid, parity::conv_matches_direct_k1_s2_valid);
            backend_test!(parity_conv_matches_direct_k5_s3_same, parity::conv_matches_direct_k5_s3_same);
            backend_test!(parity_bias_disabled_equals_zero_bias, parity::bias_disabled_equals_zero_bias);
            backend_test!(parity_channels_first_matches_channels_last, parity::channels_first_matches_channels_last);
            backend_test!(parity_activation_follows_bias, parity::activation_follows_bias);
            backend_test!(parity_matches_reference_backend, parity::matches_reference_backend);
        }
    };
}
