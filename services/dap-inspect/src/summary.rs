//! Printable summaries of datasets and fetched data.

use serde::Serialize;

use dap_model::{ArrayData, Dataset, Leaf, Record, Scalar, Value, Variable};

#[derive(Debug, Serialize)]
pub struct VariableSummary {
    pub fqn: String,
    pub kind: String,
    pub dtype: Option<String>,
    pub shape: Vec<usize>,
    pub attributes: usize,
    pub depth: usize,
}

#[derive(Debug, Serialize)]
pub struct DatasetSummary {
    pub name: String,
    pub protocol: String,
    pub dap_version: Option<String>,
    pub attributes: Vec<String>,
    pub dimensions: Vec<(String, usize)>,
    pub variables: Vec<VariableSummary>,
}

impl DatasetSummary {
    pub fn new(dataset: &Dataset) -> Self {
        let mut variables = Vec::new();
        for child in Variable::children(dataset) {
            collect(child, 0, &mut variables);
        }
        Self {
            name: dataset.name().to_string(),
            protocol: dataset.protocol().as_str().to_string(),
            dap_version: dataset.dap_version.clone(),
            attributes: dataset.attributes().keys().map(str::to_string).collect(),
            dimensions: dataset
                .dimensions()
                .into_iter()
                .map(|d| (d.fqn().to_string(), d.size))
                .collect(),
            variables,
        }
    }

    /// Indented tree, one variable per line.
    pub fn to_text(&self) -> String {
        let mut out = format!("{} ({})\n", self.name, self.protocol);
        for (name, size) in &self.dimensions {
            out.push_str(&format!("  dim {} = {}\n", name, size));
        }
        for v in &self.variables {
            let indent = "  ".repeat(v.depth + 1);
            let dtype = v.dtype.as_deref().unwrap_or("");
            let shape = if v.shape.is_empty() {
                String::new()
            } else {
                format!("{:?}", v.shape)
            };
            out.push_str(&format!("{}{:<9} {:<8} {}{}\n", indent, v.kind, dtype, v.fqn, shape));
        }
        out
    }
}

fn collect(var: &dyn Variable, depth: usize, out: &mut Vec<VariableSummary>) {
    out.push(VariableSummary {
        fqn: var.fqn().to_string(),
        kind: format!("{:?}", var.kind()),
        dtype: var.dtype().map(|t| t.to_string()),
        shape: var.shape(),
        attributes: var.attributes().len(),
        depth,
    });
    for child in var.children() {
        collect(child, depth + 1, out);
    }
}

/// Statistics of a fetched array.
#[derive(Debug, Serialize)]
pub struct ArraySummary {
    pub fqn: String,
    pub dtype: String,
    pub shape: Vec<usize>,
    pub count: usize,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub head: Vec<String>,
}

const HEAD: usize = 8;

impl ArraySummary {
    pub fn new(leaf: &Leaf) -> Self {
        let data = leaf.data();
        let numbers = data.and_then(ArrayData::to_f64_vec).unwrap_or_default();
        let finite = numbers.iter().copied().filter(|v| v.is_finite());
        let (min, max) = finite.fold((None, None), |(lo, hi): (Option<f64>, Option<f64>), v| {
            (Some(lo.map_or(v, |l| l.min(v))), Some(hi.map_or(v, |h| h.max(v))))
        });
        let head = data
            .map(|d| (0..d.len().min(HEAD)).filter_map(|i| d.get(i)).map(|s| scalar_text(&s)).collect())
            .unwrap_or_default();

        Self {
            fqn: leaf.fqn().to_string(),
            dtype: leaf.data_type().to_string(),
            shape: leaf.shape(),
            count: data.map(ArrayData::len).unwrap_or(0),
            min,
            max,
            head,
        }
    }
}

fn scalar_text(scalar: &Scalar) -> String {
    match scalar {
        Scalar::Str(s) => s.clone(),
        Scalar::Opaque(b) => format!("<{} bytes>", b.len()),
        other => other
            .as_f64()
            .map(|v| v.to_string())
            .unwrap_or_default(),
    }
}

/// One tab-separated output line per record.
pub fn format_record(record: &Record) -> String {
    record
        .values()
        .iter()
        .map(|v| match v {
            Value::Scalar(s) => scalar_text(s),
            Value::Array(a) => format!("[{} values]", a.len()),
            Value::Structure(fields) => format!("{{{} fields}}", fields.len()),
            Value::Sequence(records) => format!("[{} records]", records.len()),
        })
        .collect::<Vec<_>>()
        .join("\t")
}

#[cfg(test)]
mod tests {
    use super::*;
    use dap_model::{DataType, Dim};
    use test_utils::fixtures;

    #[test]
    fn test_dataset_summary_depths() {
        let ds = dap2_parser::parse_dds(fixtures::MIXED_DDS).unwrap();
        let summary = DatasetSummary::new(&ds);
        let station = summary.variables.iter().find(|v| v.fqn == "station").unwrap();
        assert_eq!(station.depth, 0);
        let id = summary.variables.iter().find(|v| v.fqn == "station.id").unwrap();
        assert_eq!(id.depth, 1);
        assert_eq!(id.dtype.as_deref(), Some("Int32"));
        assert!(summary.to_text().contains("station.id"));
    }

    #[test]
    fn test_dap4_summary_lists_dimensions() {
        let ds = dap4_parser::parse_dmr(fixtures::ATL03_DMR).unwrap();
        let summary = DatasetSummary::new(&ds);
        assert_eq!(summary.dimensions, vec![("/gt1r/heights/delta_time".to_string(), 100)]);
        assert_eq!(summary.dap_version.as_deref(), Some("4.0"));
        assert!(serde_json::to_string(&summary).unwrap().contains("\"protocol\":\"dap4\""));
    }

    #[test]
    fn test_array_summary_skips_nan() {
        let mut leaf = Leaf::new("v", DataType::Float32, vec![Dim::anonymous(3)]);
        leaf.set_data(ArrayData::F32(vec![2.0, f32::NAN, -1.0])).unwrap();
        let summary = ArraySummary::new(&leaf);
        assert_eq!(summary.count, 3);
        assert_eq!(summary.min, Some(-1.0));
        assert_eq!(summary.max, Some(2.0));
        assert_eq!(summary.head.len(), 3);
    }

    #[test]
    fn test_format_record() {
        let record = Record::new(vec![
            Value::Scalar(Scalar::I32(1)),
            Value::Scalar(Scalar::Str("a".into())),
        ]);
        assert_eq!(format_record(&record), "1\ta");
    }
}
