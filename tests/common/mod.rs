#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use safetensors::tensor::TensorView;
use safetensors::Dtype;

use sent_eval::config::{BertEvaluatorConfig, ElmoEvaluatorConfig};
use sent_eval::retrieval::FIELD_SEPARATOR;

pub const VOCAB: [&str; 11] = [
    "[PAD]", "[UNK]", "[CLS]", "[SEP]", "[MASK]", "나", "##는", "학교", "##에", "간", "##다",
];

pub const HIDDEN: usize = 4;
pub const ELMO_DIM: usize = 6;

fn filled(shape: &[usize], seed: usize) -> Vec<f32> {
    let n: usize = shape.iter().product();
    (0..n).map(|i| (((i * 7 + seed * 3) % 19) as f32 - 9.0) / 25.0).collect()
}

/// Fills every tensor deterministically and saves them through the crate's serializer.
pub fn write_safetensors(path: &Path, specs: Vec<(String, Vec<usize>)>) {
    let bytes: Vec<Vec<u8>> = specs
        .iter()
        .enumerate()
        .map(|(seed, (_, shape))| {
            filled(shape, seed).iter().flat_map(|v| v.to_le_bytes()).collect()
        })
        .collect();
    let views: Vec<(String, TensorView)> = specs
        .into_iter()
        .zip(&bytes)
        .map(|((name, shape), raw)| (name, TensorView::new(Dtype::F32, shape, raw).unwrap()))
        .collect();
    safetensors::serialize_to_file(views, &None, path).unwrap();
}

/// A two-layer, four-wide BERT with a two-way classifier.
pub fn bert_fixture(dir: &Path) -> BertEvaluatorConfig {
    let vocab_path = dir.join("vocab.txt");
    fs::write(&vocab_path, VOCAB.join("\n") + "\n").unwrap();

    let config_path = dir.join("bert_config.json");
    fs::write(
        &config_path,
        serde_json::json!({
            "vocab_size": VOCAB.len(), "hidden_size": HIDDEN, "num_hidden_layers": 2,
            "num_attention_heads": 2, "intermediate_size": 8, "hidden_act": "gelu",
            "max_position_embeddings": 32, "type_vocab_size": 2
        })
        .to_string(),
    )
    .unwrap();

    let h = HIDDEN;
    let mut specs = vec![
        ("bert.embeddings.word_embeddings.weight".to_string(), vec![VOCAB.len(), h]),
        ("bert.embeddings.position_embeddings.weight".to_string(), vec![32, h]),
        ("bert.embeddings.token_type_embeddings.weight".to_string(), vec![2, h]),
        ("bert.embeddings.LayerNorm.weight".to_string(), vec![h]),
        ("bert.embeddings.LayerNorm.bias".to_string(), vec![h]),
        ("bert.pooler.dense.weight".to_string(), vec![h, h]),
        ("bert.pooler.dense.bias".to_string(), vec![h]),
        ("classifier.weight".to_string(), vec![2, h]),
        ("classifier.bias".to_string(), vec![2]),
    ];
    for l in 0..2 {
        let p = format!("bert.encoder.layer.{}", l);
        let projections = [
            "attention.self.query",
            "attention.self.key",
            "attention.self.value",
            "attention.output.dense",
        ];
        for name in projections {
            specs.push((format!("{}.{}.weight", p, name), vec![h, h]));
            specs.push((format!("{}.{}.bias", p, name), vec![h]));
        }
        for name in ["attention.output.LayerNorm", "output.LayerNorm"] {
            specs.push((format!("{}.{}.weight", p, name), vec![h]));
            specs.push((format!("{}.{}.bias", p, name), vec![h]));
        }
        specs.push((format!("{}.intermediate.dense.weight", p), vec![8, h]));
        specs.push((format!("{}.intermediate.dense.bias", p), vec![8]));
        specs.push((format!("{}.output.dense.weight", p), vec![h, 8]));
        specs.push((format!("{}.output.dense.bias", p), vec![h]));
    }
    let model_dir = dir.join("bert");
    fs::create_dir_all(&model_dir).unwrap();
    write_safetensors(&model_dir.join("model-200.safetensors"), specs);

    BertEvaluatorConfig {
        model_dir,
        bert_config_path: config_path,
        vocab_path,
        max_seq_length: 32,
        dimension: HIDDEN,
        num_labels: 2,
    }
}

/// Char CNN with widths 1 and 2, one highway layer, a two-layer biLSTM.
pub fn elmo_fixture(dir: &Path, num_labels: usize) -> ElmoEvaluatorConfig {
    let options_path = dir.join("options.json");
    fs::write(
        &options_path,
        serde_json::json!({
            "lstm": {"dim": 5, "projection_dim": 3, "n_layers": 2, "cell_clip": 3.0,
                     "proj_clip": 3.0, "use_skip_connections": true},
            "char_cnn": {"embedding": {"dim": 2}, "filters": [[1, 2], [2, 3]], "n_highway": 1,
                         "n_characters": 262, "max_characters_per_token": 8, "activation": "relu"}
        })
        .to_string(),
    )
    .unwrap();

    let (p, cell, f) = (3, 5, 5);
    let mut specs = vec![
        ("char_cnn.char_embedding".to_string(), vec![262, 2]),
        ("char_cnn.filters.0.weight".to_string(), vec![1, 2, 2]),
        ("char_cnn.filters.0.bias".to_string(), vec![2]),
        ("char_cnn.filters.1.weight".to_string(), vec![2, 2, 3]),
        ("char_cnn.filters.1.bias".to_string(), vec![3]),
        ("char_cnn.highway.0.carry.weight".to_string(), vec![f, f]),
        ("char_cnn.highway.0.carry.bias".to_string(), vec![f]),
        ("char_cnn.highway.0.transform.weight".to_string(), vec![f, f]),
        ("char_cnn.highway.0.transform.bias".to_string(), vec![f]),
        ("char_cnn.projection.weight".to_string(), vec![p, f]),
        ("char_cnn.projection.bias".to_string(), vec![p]),
        ("scalar_mix.weights".to_string(), vec![3]),
        ("scalar_mix.gamma".to_string(), vec![1]),
    ];
    for direction in ["forward", "backward"] {
        for l in 0..2 {
            let prefix = format!("lstm.{}.{}", direction, l);
            specs.push((format!("{}.gates.weight", prefix), vec![4 * cell, 2 * p]));
            specs.push((format!("{}.gates.bias", prefix), vec![4 * cell]));
            specs.push((format!("{}.projection.weight", prefix), vec![p, cell]));
        }
    }
    if num_labels > 0 {
        specs.push(("classifier.weight".to_string(), vec![num_labels, 2 * p]));
        specs.push(("classifier.bias".to_string(), vec![num_labels]));
    }
    let model_dir = dir.join("elmo");
    fs::create_dir_all(&model_dir).unwrap();
    write_safetensors(&model_dir.join("elmo-5.safetensors"), specs);
    // stale file the pointer must win over
    write_safetensors(&model_dir.join("elmo-9.safetensors"), vec![]);
    fs::write(
        model_dir.join("checkpoint"),
        "model_checkpoint_path: \"elmo-5.safetensors\"\n",
    )
    .unwrap();

    ElmoEvaluatorConfig {
        model_dir,
        options_path,
        max_seq_length: 4,
        max_characters_per_token: 8,
        dimension: ELMO_DIM,
        num_labels,
    }
}

pub fn write_records(path: PathBuf, records: &[Vec<&str>]) -> PathBuf {
    let sep = FIELD_SEPARATOR.to_string();
    let body: Vec<String> = records.iter().map(|fields| fields.join(&sep)).collect();
    fs::write(&path, body.join("\n") + "\n").unwrap();
    path
}
