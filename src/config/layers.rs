//! 優先度付きの設定レイヤー
//!
//! 各レイヤーは「項目名 → 文字列値」の対応で、後から積んだレイヤーほど
//! 優先されます（既定値 < 設定ファイル < コマンドライン）。

use std::collections::HashMap;

/// 設定レイヤー
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingLayer {
    name: String,
    values: HashMap<String, String>,
}

impl SettingLayer {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            values: HashMap::new(),
        }
    }

    pub fn with_value<K: Into<String>, V: Into<String>>(mut self, option: K, value: V) -> Self {
        self.insert(option, value);
        self
    }

    pub fn insert<K: Into<String>, V: Into<String>>(&mut self, option: K, value: V) {
        self.values.insert(option.into(), value.into());
    }

    pub fn get(&self, option: &str) -> Option<&str> {
        self.values.get(option).map(String::as_str)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// 解決された値と、それを提供したレイヤー名
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<'a> {
    pub layer: &'a str,
    pub value: &'a str,
}

/// 優先度の低い順に積んだレイヤー
#[derive(Debug, Clone, Default)]
pub struct LayeredSettings {
    layers: Vec<SettingLayer>,
}

impl LayeredSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// これまでのどのレイヤーよりも優先されるレイヤーを積む
    pub fn push(&mut self, layer: SettingLayer) {
        self.layers.push(layer);
    }

    pub fn with_layer(mut self, layer: SettingLayer) -> Self {
        self.push(layer);
        self
    }

    /// 優先度の高いレイヤーから順に探す
    pub fn lookup(&self, option: &str) -> Option<Resolved<'_>> {
        self.layers.iter().rev().find_map(|layer| {
            layer.get(option).map(|value| Resolved {
                layer: layer.name(),
                value,
            })
        })
    }

    pub fn get(&self, option: &str) -> Option<&str> {
        self.lookup(option).map(|resolved| resolved.value)
    }

    pub fn layers(&self) -> &[SettingLayer] {
        &self.layers
    }
}
