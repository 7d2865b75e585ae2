//! 出力ディレクトリへの生成を通しで検証する

use std::fs;
use std::path::Path;

use tdnn_topology::{
    ConfigEmitter, LayerCompiler, ModelContext, PoolKind, TopologyError, TopologyOptions,
    read_model_context,
};

fn recipe_options(splice: &str) -> TopologyOptions {
    TopologyOptions {
        feat_dim: Some(40),
        ivector_dim: 0,
        num_targets: Some(2000),
        splice_indexes: Some(splice.to_string()),
        relu_dim: Some(850),
        ..TopologyOptions::default()
    }
}

fn generate(options: &TopologyOptions, dir: &Path) -> Result<ModelContext, TopologyError> {
    let config = options.validate()?;
    let mut emitter = ConfigEmitter::create(dir)?;
    let report = LayerCompiler::new(&config, dir).compile(&mut emitter)?;
    Ok(report.context)
}

fn read(dir: &Path, name: &str) -> String {
    fs::read_to_string(dir.join(name)).unwrap_or_else(|e| panic!("read {name}: {e}"))
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read_dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn three_layer_recipe() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let dir = tmp.path().join("configs");
    let context = generate(&recipe_options("-2,-1,0,1,2 -1,0,1 0"), &dir).expect("generate");

    assert_eq!(
        file_names(&dir),
        [
            "init.config",
            "layer1.config",
            "layer2.config",
            "layer3.config",
            "vars",
        ]
    );
    assert_eq!(
        read(&dir, "vars"),
        "model_left_context=3\nmodel_right_context=3\nnum_hidden_layers=3\n"
    );
    let expected = ModelContext {
        left_context: 3,
        right_context: 3,
        num_hidden_layers: 3,
    };
    assert_eq!(context, expected);

    let init = read(&dir, "init.config");
    assert_eq!(
        init,
        "# Config file for initializing neural network prior to\n\
         # preconditioning matrix computation\n\
         input-node name=input dim=40\n\
         \n\
         #Component nodes\n\
         output-node name=output input=Append(Offset(input, -2), Offset(input, -1), input, \
         Offset(input, 1), Offset(input, 2)) objective=linear"
    );

    let lda = dir.join("lda.mat");
    let prior = dir.join("presoftmax_prior_scale.vec");
    let expected_layer1 = format!(
        "input-node name=input dim=40\n\
         component name=L0-fixaffine type=FixedAffineComponent matrix={lda}\n\
         component name=Tdnn_0_affine type=NaturalGradientAffineComponent \
         input-dim=200 output-dim=850 bias-stddev=0\n\
         component name=Tdnn_0_relu type=RectifiedLinearComponent dim=850\n\
         component name=Tdnn_0_renorm type=NormalizeComponent dim=850 target-rms=1.0\n\
         component name=Final-affine type=NaturalGradientAffineComponent \
         input-dim=850 output-dim=2000 param-stddev=0 bias-stddev=0\n\
         component name=Final-fixed-scale type=FixedScaleComponent scales={prior}\n\
         component name=Final-log-softmax type=LogSoftmaxComponent dim=2000\n\
         \n\
         #Component nodes\n\
         component-node name=L0-fixaffine component=L0-fixaffine input=Append(Offset(input, -2), \
         Offset(input, -1), input, Offset(input, 1), Offset(input, 2))\n\
         component-node name=Tdnn_0_affine component=Tdnn_0_affine input=L0-fixaffine\n\
         component-node name=Tdnn_0_relu component=Tdnn_0_relu input=Tdnn_0_affine\n\
         component-node name=Tdnn_0_renorm component=Tdnn_0_renorm input=Tdnn_0_relu\n\
         component-node name=Final-affine component=Final-affine input=Tdnn_0_renorm\n\
         component-node name=Final-fixed-scale component=Final-fixed-scale input=Final-affine\n\
         component-node name=Final-log-softmax component=Final-log-softmax \
         input=Final-fixed-scale\n\
         output-node name=output input=Final-log-softmax objective=linear",
        lda = lda.display(),
        prior = prior.display(),
    );
    assert_eq!(read(&dir, "layer1.config"), expected_layer1);

    let layer2 = read(&dir, "layer2.config");
    assert!(layer2.starts_with(
        "component name=Tdnn_1_affine type=NaturalGradientAffineComponent \
         input-dim=2550 output-dim=850"
    ));
    assert!(layer2.contains(
        "input=Append(Offset(Tdnn_0_renorm, -1), Tdnn_0_renorm, Offset(Tdnn_0_renorm, 1))"
    ));
    assert!(!layer2.contains("L0-fixaffine"));

    // 最終層はスプライス無し
    let layer3 = read(&dir, "layer3.config");
    assert!(layer3.contains(
        "component-node name=Tdnn_2_affine component=Tdnn_2_affine input=Tdnn_1_renorm\n"
    ));
    assert!(!layer3.contains("Append"));
    assert!(!layer3.contains("Offset"));
}

#[test]
fn repeated_runs_are_byte_identical() {
    let mut options = recipe_options("-1,0,1 -1,0,1 -3,0,3 0");
    options.ivector_dim = 100;
    options.xent_regularize = 0.1;
    options.subset_dim = 300;
    options.pool_type = PoolKind::PerDimWeightedAverage;
    options.pool_window = Some(3);

    let first = tempfile::tempdir().expect("tempdir");
    let second = tempfile::tempdir().expect("tempdir");
    // config 内のパスが揃うよう同名の相対ディレクトリを使う
    let a = first.path().join("configs");
    let b = second.path().join("configs");
    generate(&options, &a).expect("first run");
    generate(&options, &b).expect("second run");

    let names = file_names(&a);
    assert_eq!(names, file_names(&b));
    for name in names {
        let left = read(&a, &name).replace(&a.display().to_string(), "<dir>");
        let right = read(&b, &name).replace(&b.display().to_string(), "<dir>");
        assert_eq!(left, right, "{name} differs");
    }
}

#[test]
fn vars_round_trip_matches_compiled_context() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut options = recipe_options("-2,-1,0,1,2 -1,0,1 -3,0,3 -7,0,2 0");
    options.pool_type = PoolKind::PerDimWeightedAverage;
    options.pool_window = Some(5);
    let context = generate(&options, tmp.path()).expect("generate");

    // スケジュール分 (13, 8) + プーリング 3 層分 (6, 6)
    let expected = ModelContext {
        left_context: 19,
        right_context: 14,
        num_hidden_layers: 5,
    };
    assert_eq!(context, expected);
    assert_eq!(read_model_context(tmp.path()).expect("read vars"), context);
}

#[test]
fn ivector_is_taken_at_time_zero() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut options = recipe_options("-1,0,1 0");
    options.ivector_dim = 100;
    generate(&options, tmp.path()).expect("generate");

    let layer1 = read(tmp.path(), "layer1.config");
    let header = "input-node name=input dim=40\ninput-node name=ivector dim=100\n";
    assert!(layer1.starts_with(header));
    assert!(layer1.contains(
        "component-node name=L0-fixaffine component=L0-fixaffine \
         input=Append(Offset(input, -1), input, Offset(input, 1), ReplaceIndex(ivector, t, 0))"
    ));
    assert!(layer1.contains("input-dim=220 output-dim=850"));
}

#[test]
fn pnorm_without_log_softmax() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut options = recipe_options("-1,0,1 -2,0,2");
    options.relu_dim = None;
    options.pnorm_input_dim = Some(2000);
    options.pnorm_output_dim = Some(250);
    options.include_log_softmax = false;
    generate(&options, tmp.path()).expect("generate");

    let layer2 = read(tmp.path(), "layer2.config");
    assert!(layer2.contains(
        "component name=Tdnn_1_pnorm type=PnormComponent input-dim=2000 output-dim=250\n"
    ));
    assert!(layer2.contains("input-dim=750 output-dim=2000 bias-stddev=0"));
    assert!(!layer2.contains("LogSoftmaxComponent"));
    assert!(!layer2.contains("FixedScaleComponent"));
    assert!(layer2.ends_with("output-node name=output input=Final-affine objective=linear"));
}

#[test]
fn weighted_average_uses_injected_filter_design() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut options = recipe_options("-1,0,1 -1,0,1");
    options.pool_type = PoolKind::WeightedAverage;
    options.pool_window = Some(3);
    options.pool_lpfilter_width = Some(0.5);
    let config = options.validate().expect("validate");
    let design = |num_taps: usize, cutoff: f64| vec![cutoff / num_taps as f64; num_taps];

    let mut emitter = ConfigEmitter::create(tmp.path()).expect("create");
    let report = LayerCompiler::new(&config, tmp.path())
        .with_filter_design(&design)
        .compile(&mut emitter)
        .expect("compile");

    assert_eq!(report.filter_taps.len(), 1);
    let taps = &report.filter_taps[0];
    assert_eq!(taps.path, tmp.path().join("Tdnn_input_smoother_1.txt"));
    assert_eq!(taps.matrix_row().len(), 4);

    let layer2 = read(tmp.path(), "layer2.config");
    let matrix = format!("matrix={} is-updatable=true", taps.path.display());
    assert!(layer2.contains(&matrix));
    assert!(layer2.contains(
        "component-node name=Tdnn_input_smoother_1_conv_t component=Tdnn_input_smoother_1_conv \
         input=Append(Offset(Tdnn_0_renorm, -1), Tdnn_0_renorm, Offset(Tdnn_0_renorm, 1))"
    ));
    assert_eq!(
        read(tmp.path(), "vars"),
        "model_left_context=3\nmodel_right_context=3\nnum_hidden_layers=2\n"
    );
}

#[test]
fn failure_keeps_already_written_artifacts() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let mut options = recipe_options("-1,0,1 -1,0,1 -3,3");
    options.subset_dim = 300;
    let err = generate(&options, tmp.path()).unwrap_err();
    assert!(matches!(err, TopologyError::Config(_)));

    let names = file_names(tmp.path());
    assert_eq!(names, ["init.config", "layer1.config", "layer2.config"]);
}

#[test]
fn write_failure_reports_path_and_skips_vars() {
    let tmp = tempfile::tempdir().expect("tempdir");
    // 同名のディレクトリがあると layer1.config は作れない
    let blocked = tmp.path().join("layer1.config");
    fs::create_dir(&blocked).expect("create blocking dir");

    let err = generate(&recipe_options("-1,0,1 -1,0,1 0"), tmp.path()).unwrap_err();
    match err {
        TopologyError::Io { path, .. } => assert_eq!(path, blocked),
        other => panic!("unexpected error: {other}"),
    }

    assert!(tmp.path().join("init.config").is_file());
    assert!(!tmp.path().join("layer2.config").exists());
    assert!(!tmp.path().join("vars").exists());
}

#[test]
fn unsorted_group_is_reported() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let err = generate(&recipe_options("-1,0,1 2,-1"), tmp.path()).unwrap_err();
    match err {
        TopologyError::Format { group, input, .. } => {
            assert_eq!(group, "2,-1");
            assert_eq!(input, "-1,0,1 2,-1");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(file_names(tmp.path()).is_empty());
}

#[test]
fn options_from_toml_file() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("tdnn.toml");
    let text = r#"
feat-dim = 13
num-targets = 500
splice-indexes = "-1,0,1 0"
relu-dim = 256
xent-regularize = 0.1
"#;
    fs::write(&path, text).expect("write toml");

    let options = TopologyOptions::load(&path).expect("load");
    let out = tmp.path().join("configs");
    generate(&options, &out).expect("generate");
    let layer2 = read(&out, "layer2.config");
    assert!(layer2.contains(
        "output-node name=output-xent input=Final-xent-log-softmax objective=linear"
    ));

    let err = TopologyOptions::load(tmp.path().join("missing.toml")).unwrap_err();
    assert!(matches!(err, TopologyError::Io { .. }));
}
