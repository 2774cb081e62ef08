//! Late-interaction (ColBERT-style) MaxSim scoring (§4.10 step 5).

/// `MaxSim(q_late, M_d) = Σ_i max_j (q_late[i] · dequant(M_d[j]))`.
///
/// `q` is the flattened `[T_q x D_late]` query matrix; `doc_embeddings` is
/// the document's row-major INT8 matrix (`T_d x D_late`, `T_d = doc_len`);
/// dequantization divides each INT8 lane by 127 and multiplies by the
/// document's global max-abs scale.
pub fn maxsim(q: &[f32], t_q: usize, d_late: usize, doc_embeddings: &[i8], doc_len: usize) -> f32 {
    maxsim_scaled(q, t_q, d_late, doc_embeddings, doc_len, 1.0, &[])
}

/// `maxsim` with an explicit dequantization scale and a token-ID skip-list:
/// positions whose token ID is in `skip_token_ids` are excluded from the
/// inner max before it contributes to the sum (§4.10 step 5).
pub fn maxsim_scaled(
    q: &[f32],
    t_q: usize,
    d_late: usize,
    doc_embeddings: &[i8],
    doc_len: usize,
    scale: f32,
    skip_positions: &[bool],
) -> f32 {
    if t_q == 0 || d_late == 0 || doc_len == 0 {
        return 0.0;
    }
    let mut total = 0.0f32;
    for i in 0..t_q {
        let q_row = &q[i * d_late..(i + 1) * d_late];
        let mut best = f32::NEG_INFINITY;
        for j in 0..doc_len {
            if skip_positions.get(j).copied().unwrap_or(false) {
                continue;
            }
            let d_row = &doc_embeddings[j * d_late..(j + 1) * d_late];
            let mut dot = 0.0f32;
            for k in 0..d_late {
                dot += q_row[k] * (d_row[k] as f32 / 127.0 * scale);
            }
            if dot > best {
                best = dot;
            }
        }
        if best.is_finite() {
            total += best;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_single_token_matrices_score_positive() {
        let q = vec![1.0, 0.0];
        let doc: Vec<i8> = vec![127, 0];
        let score = maxsim(&q, 1, 2, &doc, 1);
        assert!(score > 0.9);
    }

    #[test]
    fn empty_doc_scores_zero() {
        let q = vec![1.0, 0.0];
        let score = maxsim(&q, 1, 2, &[], 0);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn skip_list_excludes_positions_from_max() {
        let q = vec![1.0, 0.0];
        // Row 0 is the best match; skip it and row 1 (all zero) should win (score 0).
        let doc: Vec<i8> = vec![127, 0, 0, 0];
        let full = maxsim_scaled(&q, 1, 2, &doc, 2, 1.0, &[false, false]);
        let skipped = maxsim_scaled(&q, 1, 2, &doc, 2, 1.0, &[true, false]);
        assert!(full > skipped);
    }
}
