//! 1 層分のノード蓄積
//!
//! `LayerUnit` は 1 層のコンパイル中に追加されたコンポーネント行とノード行を保持する。
//! `finish` で確定すると、その層のアーティファクトと、宣言済みノード集合だけを
//! 引き継いだ空の次ユニットを返す。

use std::collections::BTreeSet;

use crate::descriptor::Descriptor;
use crate::error::{TopologyError, TopologyResult};

/// 1 層分のコンポーネント行とノード行
#[derive(Debug, Clone, Default)]
pub struct LayerUnit {
    components: Vec<String>,
    component_nodes: Vec<String>,
    declared: BTreeSet<String>,
}

impl LayerUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn component_nodes(&self) -> &[String] {
        &self.component_nodes
    }

    /// これまでに（前の層も含めて）宣言されたノードか
    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains(name)
    }

    pub fn add_component(&mut self, line: String) {
        self.components.push(line);
    }

    /// `input-node` を宣言する（コンポーネント節に置く）
    pub fn add_input_node(&mut self, name: &str, dim: usize) {
        self.components.push(format!("input-node name={name} dim={dim}"));
        self.declared.insert(name.to_string());
    }

    /// `component-node` を追加して `name` を宣言する
    pub fn add_component_node(
        &mut self,
        name: &str,
        component: &str,
        input: &Descriptor,
    ) -> TopologyResult<()> {
        self.check_references(input)?;
        self.component_nodes
            .push(format!("component-node name={name} component={component} input={input}"));
        self.declared.insert(name.to_string());
        Ok(())
    }

    /// `dim-range-node` を追加する
    ///
    /// `range` は [`Descriptor::dim_range`] で作ったものでなければならない。
    pub fn add_dim_range_node(&mut self, range: &Descriptor) -> TopologyResult<()> {
        match range {
            Descriptor::DimRange {
                name,
                input,
                offset,
                dim,
            } => {
                self.check_references(input)?;
                self.component_nodes.push(format!(
                    "dim-range-node name={name} input-node={input} dim-offset={offset} dim={dim}"
                ));
                self.declared.insert(name.clone());
                Ok(())
            }
            _ => Err(TopologyError::config(format!("'{range}' is not a dim-range descriptor"))),
        }
    }

    /// `output-node` を追加する
    pub fn add_output_node(&mut self, name: &str, input: &Descriptor) -> TopologyResult<()> {
        self.check_references(input)?;
        self.component_nodes
            .push(format!("output-node name={name} input={input} objective=linear"));
        Ok(())
    }

    /// `input` が参照するノードがすべて宣言済みかを検査する
    pub fn check_references(&self, input: &Descriptor) -> TopologyResult<()> {
        input.validate()?;
        for node in input.referenced_nodes() {
            if !self.declared.contains(node) {
                return Err(TopologyError::DanglingReference {
                    node: node.to_string(),
                });
            }
        }
        Ok(())
    }

    /// 現在の内容を確定してアーティファクトにし、次の層用の空ユニットを返す
    pub fn finish(self) -> (ConfigArtifact, LayerUnit) {
        let next = LayerUnit {
            components: Vec::new(),
            component_nodes: Vec::new(),
            declared: self.declared,
        };
        let artifact = ConfigArtifact {
            header: Vec::new(),
            components: self.components,
            component_nodes: self.component_nodes,
        };
        (artifact, next)
    }
}

/// 1 ファイル分の config 内容
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigArtifact {
    /// 先頭に置くコメント行（`#` 付き）
    pub header: Vec<String>,
    pub components: Vec<String>,
    pub component_nodes: Vec<String>,
}

impl ConfigArtifact {
    /// 先頭コメント行を付ける
    #[must_use]
    pub fn with_header<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.header = lines.into_iter().map(Into::into).collect();
        self
    }

    /// 学習エンジンが読む書式に整形する
    ///
    /// コンポーネント節、空行、`#Component nodes`、ノード節の順。末尾に改行は付けない。
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in self.header.iter().chain(&self.components) {
            out.push_str(line);
            out.push('\n');
        }
        if self.header.is_empty() && self.components.is_empty() {
            out.push('\n');
        }
        out.push_str("\n#Component nodes\n");
        out.push_str(&self.component_nodes.join("\n"));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undeclared_reference_is_rejected() {
        let mut unit = LayerUnit::new();
        let input = Descriptor::node("input", 40);
        let lda = "L0-fixaffine";
        let err = unit.add_component_node(lda, lda, &input).unwrap_err();
        assert!(matches!(err, TopologyError::DanglingReference { ref node } if node == "input"));

        unit.add_input_node("input", 40);
        assert!(unit.add_component_node(lda, lda, &input).is_ok());
        assert!(unit.is_declared("L0-fixaffine"));
    }

    #[test]
    fn finish_keeps_declarations_but_clears_lines() {
        let mut unit = LayerUnit::new();
        unit.add_input_node("input", 40);
        let input = Descriptor::node("input", 40);
        unit.add_output_node("output", &input).expect("output node");

        let (artifact, next) = unit.finish();
        assert_eq!(artifact.components, vec!["input-node name=input dim=40"]);
        assert_eq!(
            artifact.component_nodes,
            vec!["output-node name=output input=input objective=linear"]
        );
        assert!(next.components().is_empty());
        assert!(next.component_nodes().is_empty());
        assert!(next.is_declared("input"));
    }

    #[test]
    fn dim_range_node_line() {
        let mut unit = LayerUnit::new();
        unit.add_input_node("Tdnn_0_renorm", 850);
        let renorm = Descriptor::node("Tdnn_0_renorm", 850);
        let range = Descriptor::dim_range("Tdnn_input_1", &renorm, 0, 300).unwrap();
        unit.add_dim_range_node(&range).expect("dim-range-node");
        assert_eq!(
            unit.component_nodes(),
            ["dim-range-node name=Tdnn_input_1 input-node=Tdnn_0_renorm dim-offset=0 dim=300"]
        );
        assert!(unit.is_declared("Tdnn_input_1"));
    }

    #[test]
    fn render_layout() {
        let artifact = ConfigArtifact {
            header: Vec::new(),
            components: vec!["c1".into(), "c2".into()],
            component_nodes: vec!["n1".into(), "n2".into()],
        };
        assert_eq!(artifact.render(), "c1\nc2\n\n#Component nodes\nn1\nn2");

        let with_header = artifact.with_header(["# a", "# b"]);
        assert_eq!(with_header.render(), "# a\n# b\nc1\nc2\n\n#Component nodes\nn1\nn2");
    }

    #[test]
    fn render_empty_components() {
        let artifact = ConfigArtifact {
            header: Vec::new(),
            components: Vec::new(),
            component_nodes: vec!["n1".into()],
        };
        assert_eq!(artifact.render(), "\n\n#Component nodes\nn1");
    }
}
