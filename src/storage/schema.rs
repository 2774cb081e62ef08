//! Arrow schema and row (de)serialization for the vector store (C5, §4.5).

use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::array::BooleanArray;
use arrow::array::Float32Array;
use arrow::array::Int32Array;
use arrow::array::ListArray;
use arrow::array::RecordBatch;
use arrow::array::StringArray;
use arrow::array::UInt32Array;
use arrow::array::builder::FixedSizeListBuilder;
use arrow::array::builder::Float32Builder;
use arrow::array::builder::ListBuilder;
use arrow::array::builder::StringBuilder;
use arrow::array::builder::UInt32Builder;
use arrow::datatypes::DataType;
use arrow::datatypes::Field;
use arrow::datatypes::Schema;

use crate::error::OsgrepError;
use crate::error::Result;
use crate::types::Chunk;
use crate::types::ChunkType;
use crate::types::Role;
use crate::types::VectorPayload;

pub const TABLE_NAME: &str = "chunks";
pub const CONTENT_COLUMN: &str = "content";

/// Builds the table schema for a given dense dimension (§4.5's column
/// table; `vector` is `fixed_size_list<float32>[D_dense]`).
pub fn schema(dense_dimension: i32) -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("path", DataType::Utf8, false),
        Field::new("hash", DataType::Utf8, false),
        Field::new(CONTENT_COLUMN, DataType::Utf8, false),
        Field::new("display_text", DataType::Utf8, false),
        Field::new("start_line", DataType::Int32, false),
        Field::new("end_line", DataType::Int32, false),
        Field::new("chunk_index", DataType::Int32, false),
        Field::new("is_anchor", DataType::Boolean, false),
        Field::new("is_exported", DataType::Boolean, false),
        Field::new("chunk_type", DataType::Utf8, false),
        Field::new("role", DataType::Utf8, false),
        Field::new("parent_symbol", DataType::Utf8, true),
        Field::new("complexity", DataType::Int32, false),
        Field::new("context_prev", DataType::Utf8, true),
        Field::new("context_next", DataType::Utf8, true),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dense_dimension,
            ),
            true,
        ),
        Field::new(
            "colbert",
            DataType::List(Arc::new(Field::new("item", DataType::Int32, true))),
            true,
        ),
        Field::new("colbert_scale", DataType::Float32, true),
        Field::new(
            "doc_token_ids",
            DataType::List(Arc::new(Field::new("item", DataType::UInt32, true))),
            true,
        ),
        Field::new(
            "defined_symbols",
            DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
            false,
        ),
        Field::new(
            "referenced_symbols",
            DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
            false,
        ),
        Field::new(
            "imports",
            DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
            false,
        ),
        Field::new(
            "exports",
            DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
            false,
        ),
    ])
}

fn string_list_array(values: &[Vec<String>]) -> ListArray {
    let mut builder = ListBuilder::new(StringBuilder::new());
    for row in values {
        for v in row {
            builder.values().append_value(v);
        }
        builder.append(true);
    }
    builder.finish()
}

fn u32_list_array(values: &[Vec<u32>]) -> ListArray {
    let mut builder = ListBuilder::new(UInt32Builder::new());
    for row in values {
        for v in row {
            builder.values().append_value(*v);
        }
        builder.append(!row.is_empty() || true);
    }
    builder.finish()
}

fn i8_as_i32_list_array(values: &[Option<Vec<i8>>]) -> ListArray {
    let mut builder = ListBuilder::new(arrow::array::builder::Int32Builder::new());
    for row in values {
        match row {
            Some(bytes) => {
                for b in bytes {
                    builder.values().append_value(*b as i32);
                }
                builder.append(true);
            }
            None => builder.append(false),
        }
    }
    builder.finish()
}

/// Converts `chunks` (with optional paired `VectorPayload`s — a row may be
/// written before embeddings exist, e.g. a dry-run preview) into one
/// `RecordBatch` for `table.add()`.
pub fn chunks_to_batch(
    chunks: &[Chunk],
    payloads: &[Option<VectorPayload>],
    dense_dimension: i32,
) -> Result<RecordBatch> {
    let n = chunks.len();
    let mut vector_builder =
        FixedSizeListBuilder::new(Float32Builder::new(), dense_dimension);
    for payload in payloads {
        match payload {
            Some(p) if p.dense.len() == dense_dimension as usize => {
                for v in &p.dense {
                    vector_builder.values().append_value(*v);
                }
                vector_builder.append(true);
            }
            _ => {
                for _ in 0..dense_dimension {
                    vector_builder.values().append_null();
                }
                vector_builder.append(false);
            }
        }
    }

    let colbert_rows: Vec<Option<Vec<i8>>> = payloads
        .iter()
        .map(|p| p.as_ref().map(|p| p.colbert.clone()))
        .collect();
    let token_id_rows: Vec<Vec<u32>> = payloads
        .iter()
        .map(|p| p.as_ref().map(|p| p.doc_token_ids.clone()).unwrap_or_default())
        .collect();
    let colbert_scales: Vec<Option<f32>> = payloads
        .iter()
        .map(|p| p.as_ref().map(|p| p.colbert_scale))
        .collect();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.id.clone()))),
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.path.clone()))),
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.hash.clone()))),
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.content.clone()))),
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.display_text.clone()))),
        Arc::new(Int32Array::from_iter_values(chunks.iter().map(|c| c.start_line as i32))),
        Arc::new(Int32Array::from_iter_values(chunks.iter().map(|c| c.end_line as i32))),
        Arc::new(Int32Array::from_iter_values(chunks.iter().map(|c| c.chunk_index))),
        Arc::new(BooleanArray::from_iter(chunks.iter().map(|c| Some(c.is_anchor)))),
        Arc::new(BooleanArray::from_iter(chunks.iter().map(|c| Some(c.is_exported)))),
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.chunk_type.as_str().to_string()))),
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.role.as_str().to_string()))),
        Arc::new(StringArray::from_iter(chunks.iter().map(|c| c.parent_symbol.clone()))),
        Arc::new(Int32Array::from_iter_values(chunks.iter().map(|c| c.complexity))),
        Arc::new(StringArray::from_iter(chunks.iter().map(|c| c.context_prev.clone()))),
        Arc::new(StringArray::from_iter(chunks.iter().map(|c| c.context_next.clone()))),
        Arc::new(vector_builder.finish()),
        Arc::new(i8_as_i32_list_array(&colbert_rows)),
        Arc::new(Float32Array::from_iter(colbert_scales)),
        Arc::new(u32_list_array(&token_id_rows)),
        Arc::new(string_list_array(
            &chunks.iter().map(|c| c.defined_symbols.clone()).collect::<Vec<_>>(),
        )),
        Arc::new(string_list_array(
            &chunks.iter().map(|c| c.referenced_symbols.clone()).collect::<Vec<_>>(),
        )),
        Arc::new(string_list_array(
            &chunks.iter().map(|c| c.imports.clone()).collect::<Vec<_>>(),
        )),
        Arc::new(string_list_array(
            &chunks.iter().map(|c| c.exports.clone()).collect::<Vec<_>>(),
        )),
    ];

    let _ = n;
    RecordBatch::try_new(Arc::new(schema(dense_dimension)), columns).map_err(|e| {
        OsgrepError::StoreWriteFailed {
            cause: e.to_string(),
        }
    })
}

fn list_column_to_strings(batch: &RecordBatch, name: &str, row: usize) -> Vec<String> {
    let Some(col) = batch.column_by_name(name) else {
        return Vec::new();
    };
    let Some(list) = col.as_any().downcast_ref::<ListArray>() else {
        return Vec::new();
    };
    let values = list.value(row);
    let Some(strings) = values.as_any().downcast_ref::<StringArray>() else {
        return Vec::new();
    };
    (0..strings.len())
        .filter(|&i| strings.is_valid(i))
        .map(|i| strings.value(i).to_string())
        .collect()
}

/// Reverse-parses a `RecordBatch` into `Chunk`s; every consumer validates
/// element types defensively rather than trusting the schema blindly (§9
/// design note on Arrow-typed array columns).
pub fn batch_to_chunks(batch: &RecordBatch) -> Vec<Chunk> {
    let ids = batch.column_by_name("id").and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned_opt());
    let paths = batch.column_by_name("path").and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned_opt());
    let hashes = batch.column_by_name("hash").and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned_opt());
    let contents = batch.column_by_name("content").and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned_opt());
    let display_texts = batch.column_by_name("display_text").and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned_opt());
    let starts = batch.column_by_name("start_line").and_then(|c| c.as_any().downcast_ref::<Int32Array>().cloned_opt());
    let ends = batch.column_by_name("end_line").and_then(|c| c.as_any().downcast_ref::<Int32Array>().cloned_opt());
    let idxs = batch.column_by_name("chunk_index").and_then(|c| c.as_any().downcast_ref::<Int32Array>().cloned_opt());
    let anchors = batch.column_by_name("is_anchor").and_then(|c| c.as_any().downcast_ref::<BooleanArray>().cloned_opt());
    let exported = batch.column_by_name("is_exported").and_then(|c| c.as_any().downcast_ref::<BooleanArray>().cloned_opt());
    let types = batch.column_by_name("chunk_type").and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned_opt());
    let roles = batch.column_by_name("role").and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned_opt());
    let parents = batch.column_by_name("parent_symbol").and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned_opt());
    let complexities = batch.column_by_name("complexity").and_then(|c| c.as_any().downcast_ref::<Int32Array>().cloned_opt());
    let ctx_prev = batch.column_by_name("context_prev").and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned_opt());
    let ctx_next = batch.column_by_name("context_next").and_then(|c| c.as_any().downcast_ref::<StringArray>().cloned_opt());

    let mut out = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let get_str = |col: &Option<StringArray>| col.as_ref().map(|a| a.value(row).to_string()).unwrap_or_default();
        let get_opt_str = |col: &Option<StringArray>| {
            col.as_ref().and_then(|a| if a.is_valid(row) { Some(a.value(row).to_string()) } else { None })
        };
        let get_i32 = |col: &Option<Int32Array>| col.as_ref().map(|a| a.value(row)).unwrap_or(0);
        let get_bool = |col: &Option<BooleanArray>| col.as_ref().map(|a| a.value(row)).unwrap_or(false);

        out.push(Chunk {
            id: get_str(&ids),
            path: get_str(&paths),
            hash: get_str(&hashes),
            chunk_index: get_i32(&idxs),
            start_line: get_i32(&starts).max(0) as u32,
            end_line: get_i32(&ends).max(0) as u32,
            content: get_str(&contents),
            display_text: get_str(&display_texts),
            context_prev: get_opt_str(&ctx_prev),
            context_next: get_opt_str(&ctx_next),
            chunk_type: ChunkType::from_str(&get_str(&types)),
            is_anchor: get_bool(&anchors),
            parent_symbol: get_opt_str(&parents),
            role: Role::from_str(&get_str(&roles)),
            complexity: get_i32(&complexities),
            is_exported: get_bool(&exported),
            defined_symbols: list_column_to_strings(batch, "defined_symbols", row),
            referenced_symbols: list_column_to_strings(batch, "referenced_symbols", row),
            imports: list_column_to_strings(batch, "imports", row),
            exports: list_column_to_strings(batch, "exports", row),
        });
    }
    out
}

fn list_column_to_u32(batch: &RecordBatch, name: &str, row: usize) -> Vec<u32> {
    let Some(col) = batch.column_by_name(name) else {
        return Vec::new();
    };
    let Some(list) = col.as_any().downcast_ref::<ListArray>() else {
        return Vec::new();
    };
    let values = list.value(row);
    let Some(ints) = values.as_any().downcast_ref::<UInt32Array>() else {
        return Vec::new();
    };
    (0..ints.len()).filter(|&i| ints.is_valid(i)).map(|i| ints.value(i)).collect()
}

fn list_column_to_i8(batch: &RecordBatch, name: &str, row: usize) -> Option<Vec<i8>> {
    let col = batch.column_by_name(name)?;
    let list = col.as_any().downcast_ref::<ListArray>()?;
    if list.is_null(row) {
        return None;
    }
    let values = list.value(row);
    let ints = values.as_any().downcast_ref::<Int32Array>()?;
    Some((0..ints.len()).map(|i| ints.value(i) as i8).collect())
}

/// Extracts the `VectorPayload` for each row, parallel to `batch_to_chunks`
/// — used by the retriever's late-interaction rerank step, which needs the
/// packed `colbert`/`doc_token_ids` columns `Chunk` itself doesn't carry.
pub fn batch_to_payloads(batch: &RecordBatch, dense_dimension: i32) -> Vec<Option<VectorPayload>> {
    let vectors = batch
        .column_by_name("vector")
        .and_then(|c| c.as_any().downcast_ref::<arrow::array::FixedSizeListArray>());
    let scales = batch
        .column_by_name("colbert_scale")
        .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    (0..batch.num_rows())
        .map(|row| {
            let dense = vectors.and_then(|v| {
                if v.is_null(row) {
                    return None;
                }
                let row_arr = v.value(row);
                let floats = row_arr.as_any().downcast_ref::<Float32Array>()?;
                if floats.len() != dense_dimension as usize {
                    return None;
                }
                Some((0..floats.len()).map(|i| floats.value(i)).collect::<Vec<f32>>())
            });
            let colbert = list_column_to_i8(batch, "colbert", row);
            let (dense, colbert) = match (dense, colbert) {
                (Some(d), Some(c)) => (d, c),
                _ => return None,
            };
            Some(VectorPayload {
                dense,
                colbert,
                colbert_scale: scales.map(|s| s.value(row)).unwrap_or(1.0),
                doc_token_ids: list_column_to_u32(batch, "doc_token_ids", row),
            })
        })
        .collect()
}

/// `downcast_ref` returns a borrow tied to the array's lifetime; this
/// clones the (cheap, Arc-backed) array so callers can hold it alongside
/// the other columns without fighting the borrow checker.
trait ClonedOpt<T> {
    fn cloned_opt(&self) -> Option<T>;
}

impl ClonedOpt<StringArray> for StringArray {
    fn cloned_opt(&self) -> Option<StringArray> {
        Some(self.clone())
    }
}

impl ClonedOpt<Int32Array> for Int32Array {
    fn cloned_opt(&self) -> Option<Int32Array> {
        Some(self.clone())
    }
}

impl ClonedOpt<BooleanArray> for BooleanArray {
    fn cloned_opt(&self) -> Option<BooleanArray> {
        Some(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_chunk(id: &str, path: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            path: path.to_string(),
            hash: "h".to_string(),
            chunk_index: 0,
            start_line: 0,
            end_line: 1,
            content: "fn f() {}".to_string(),
            display_text: "fn f() {}".to_string(),
            context_prev: None,
            context_next: None,
            chunk_type: ChunkType::Function,
            is_anchor: false,
            parent_symbol: None,
            role: Role::Implementation,
            complexity: 1,
            is_exported: true,
            defined_symbols: vec!["f".to_string()],
            referenced_symbols: vec![],
            imports: vec![],
            exports: vec!["f".to_string()],
        }
    }

    #[test]
    fn round_trips_chunk_through_record_batch() {
        let chunks = vec![test_chunk("1", "a.rs"), test_chunk("2", "b.rs")];
        let payloads = vec![None, None];
        let batch = chunks_to_batch(&chunks, &payloads, 4).unwrap();
        let restored = batch_to_chunks(&batch);
        assert_eq!(restored.len(), 2);
        assert_eq!(restored[0].id, "1");
        assert_eq!(restored[0].defined_symbols, vec!["f".to_string()]);
        assert_eq!(restored[1].path, "b.rs");
    }

    #[test]
    fn embedding_present_round_trips_vector_column() {
        let chunks = vec![test_chunk("1", "a.rs")];
        let payloads = vec![Some(VectorPayload {
            dense: vec![0.1, 0.2, 0.3, 0.4],
            colbert: vec![1, -1],
            colbert_scale: 1.0,
            doc_token_ids: vec![10, 11],
        })];
        let batch = chunks_to_batch(&chunks, &payloads, 4).unwrap();
        assert_eq!(batch.num_rows(), 1);
    }
}
