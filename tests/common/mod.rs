//! A tiny randomly initialised T5 checkpoint laid out as a hub cache.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use candle_transformers::models::t5;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use flan_t5_serve::{MemoryObserver, MemoryProbe, MemoryUsage};

pub const MODEL_ID: &str = "google/flan-t5-small";
/// A second cached checkpoint, for telling a checkpoint's own tokenizer from the base model's.
pub const OTHER_MODEL_ID: &str = "google/flan-t5-base";
pub const REVISION: &str = "fixture";
pub const SPECIAL_MARKERS: [&str; 3] = ["<pad>", "</s>", "<unk>"];

pub fn config_json(d_ff: usize) -> String {
    format!(
        r#"{{
  "vocab_size": 32,
  "d_model": 32,
  "d_kv": 8,
  "d_ff": {d_ff},
  "num_layers": 2,
  "num_decoder_layers": 2,
  "num_heads": 4,
  "relative_attention_num_buckets": 32,
  "relative_attention_max_distance": 128,
  "dropout_rate": 0.0,
  "layer_norm_epsilon": 1e-6,
  "initializer_factor": 1.0,
  "feed_forward_proj": "gated-gelu",
  "tie_word_embeddings": false,
  "is_decoder": false,
  "is_encoder_decoder": true,
  "use_cache": true,
  "pad_token_id": 0,
  "eos_token_id": 1,
  "decoder_start_token_id": 0
}}"#
    )
}

const WORDS: [&str; 29] = [
    "Translate", "to", "French", ":", "Hello", ",", "how", "are", "you", "?", "bonjour",
    "comment", "allez", "vous", "merci", "oui", "non", "le", "la", "un", "une", "et", "est",
    "bien", "très", "je", "tu", "il", "elle",
];

pub fn tokenizer_json() -> String {
    tokenizer_json_with(&[])
}

/// The fixture vocabulary plus `extra` word-to-id entries, ids unchecked against the model.
pub fn tokenizer_json_with(extra: &[(&str, u32)]) -> String {
    let mut vocab = vec![
        r#""<pad>": 0"#.to_string(),
        r#""</s>": 1"#.to_string(),
        r#""<unk>": 2"#.to_string(),
    ];
    for (i, word) in WORDS.iter().enumerate() {
        vocab.push(format!(r#""{word}": {}"#, i + 3));
    }
    for (word, id) in extra {
        vocab.push(format!(r#""{word}": {id}"#));
    }

    let added = ["<pad>", "</s>", "<unk>"]
        .iter()
        .enumerate()
        .map(|(id, content)| {
            format!(
                r#"{{"id": {id}, "content": "{content}", "single_word": false, "lstrip": false, "rstrip": false, "normalized": false, "special": true}}"#
            )
        })
        .collect::<Vec<_>>();

    format!(
        r#"{{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [{added}],
  "normalizer": null,
  "pre_tokenizer": {{"type": "Whitespace"}},
  "post_processor": {{
    "type": "TemplateProcessing",
    "single": [{{"Sequence": {{"id": "A", "type_id": 0}}}}, {{"SpecialToken": {{"id": "</s>", "type_id": 0}}}}],
    "pair": [{{"Sequence": {{"id": "A", "type_id": 0}}}}, {{"SpecialToken": {{"id": "</s>", "type_id": 0}}}}, {{"Sequence": {{"id": "B", "type_id": 0}}}}, {{"SpecialToken": {{"id": "</s>", "type_id": 0}}}}],
    "special_tokens": {{"</s>": {{"id": "</s>", "ids": [1], "tokens": ["</s>"]}}}}
  }},
  "decoder": null,
  "model": {{"type": "WordLevel", "vocab": {{{vocab}}}, "unk_token": "<unk>"}}
}}"#,
        added = added.join(", "),
        vocab = vocab.join(", "),
    )
}

/// Builds every parameter the T5 loader asks for, filled with seeded uniform noise.
pub fn write_weights(path: &Path, d_ff: usize, seed: u64) {
    let config: t5::Config = serde_json::from_str(&config_json(d_ff)).unwrap();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    t5::T5ForConditionalGeneration::load(vb, &config).unwrap();

    let mut rng = StdRng::seed_from_u64(seed);
    let mut vars = varmap.data().lock().unwrap().iter().map(|(name, var)| (name.clone(), var.clone())).collect::<Vec<_>>();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    for (_, var) in vars {
        let shape = var.as_tensor().shape().clone();
        let values = (0..shape.elem_count())
            .map(|_| rng.random_range(-1.0f32..1.0))
            .collect::<Vec<_>>();
        var.set(&Tensor::from_vec(values, shape, &Device::Cpu).unwrap())
            .unwrap();
    }
    varmap.save(path).unwrap();
}

pub struct Fixture {
    pub root: PathBuf,
}

impl Fixture {
    /// Fresh cache with config, weights and tokenizer for [`MODEL_ID`].
    pub fn new(name: &str) -> Self {
        let root = std::env::temp_dir().join(format!(
            "flan-t5-serve-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&root);

        let fixture = Self { root };
        fixture.add_model(MODEL_ID, &tokenizer_json(), 17);
        fixture
    }

    /// Caches config, weights and `tokenizer` under `model_id`.
    pub fn add_model(&self, model_id: &str, tokenizer: &str, seed: u64) {
        let snapshot = self.snapshot_dir_of(model_id);
        fs::create_dir_all(&snapshot).unwrap();
        let refs = self.repo_dir_of(model_id).join("refs");
        fs::create_dir_all(&refs).unwrap();
        fs::write(refs.join("main"), REVISION).unwrap();

        fs::write(snapshot.join("config.json"), config_json(64)).unwrap();
        fs::write(snapshot.join("tokenizer.json"), tokenizer).unwrap();
        write_weights(&snapshot.join("model.safetensors"), 64, seed);
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn repo_dir(&self) -> PathBuf {
        self.repo_dir_of(MODEL_ID)
    }

    pub fn repo_dir_of(&self, model_id: &str) -> PathBuf {
        self.cache_dir()
            .join(format!("models--{}", model_id.replace('/', "--")))
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.snapshot_dir_of(MODEL_ID)
    }

    pub fn snapshot_dir_of(&self, model_id: &str) -> PathBuf {
        self.repo_dir_of(model_id).join("snapshots").join(REVISION)
    }

    pub fn weights(&self) -> PathBuf {
        self.snapshot_dir().join("model.safetensors")
    }

    /// Overwrites the tokenizer of [`MODEL_ID`].
    pub fn replace_tokenizer(&self, tokenizer: &str) {
        fs::write(self.snapshot_dir().join("tokenizer.json"), tokenizer).unwrap();
    }

    /// Splits `model.safetensors` into two shards plus an index, then removes it.
    pub fn shard_weights(&self) {
        let tensors = candle_core::safetensors::load(self.weights(), &Device::Cpu).unwrap();
        let mut names = tensors.keys().cloned().collect::<Vec<_>>();
        names.sort();
        let half = names.len() / 2;

        let shard_names = [
            "model-00001-of-00002.safetensors",
            "model-00002-of-00002.safetensors",
        ];
        let mut weight_map = BTreeMap::new();
        for (shard, chunk) in shard_names.iter().zip([&names[..half], &names[half..]]) {
            let part = chunk
                .iter()
                .map(|name| (name.clone(), tensors[name].clone()))
                .collect::<std::collections::HashMap<_, _>>();
            candle_core::safetensors::save(&part, self.snapshot_dir().join(shard)).unwrap();
            for name in chunk {
                weight_map.insert(name.clone(), shard.to_string());
            }
        }

        let index = serde_json::json!({ "metadata": {}, "weight_map": weight_map });
        fs::write(
            self.snapshot_dir().join("model.safetensors.index.json"),
            index.to_string(),
        )
        .unwrap();
        fs::remove_file(self.weights()).unwrap();
    }

    /// A file outside the cache, for the streamed loader.
    pub fn outside(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

pub fn assert_clean(outputs: &[String]) {
    for text in outputs {
        for marker in SPECIAL_MARKERS {
            assert!(!text.contains(marker), "{text:?} contains {marker}");
        }
    }
}

pub struct FixedProbe(pub MemoryUsage);

impl MemoryProbe for FixedProbe {
    fn sample(&self) -> Option<MemoryUsage> {
        Some(self.0)
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub seen: Mutex<Vec<MemoryUsage>>,
}

impl MemoryObserver for RecordingObserver {
    fn observe(&self, usage: &MemoryUsage) {
        self.seen.lock().unwrap().push(*usage);
    }
}

pub fn recording() -> Arc<RecordingObserver> {
    Arc::new(RecordingObserver::default())
}
