/// División de un job en chunks contiguos que preservan el orden.
///
/// Tamaño por división con techo (`⌈n/k⌉`), así el último chunk puede quedar
/// más corto y nunca salen más de `k` chunks.
pub fn split(data: &[f64], k: usize) -> Vec<Vec<f64>> {
    if data.is_empty() || k == 0 {
        return Vec::new();
    }
    let chunk_size = data.len().div_ceil(k);
    data.chunks(chunk_size).map(|c| c.to_vec()).collect()
}

/// Identidad de un chunk: `{jobId}-c{index}`.
pub fn chunk_id(job_id: &str, index: usize) -> String {
    format!("{}-c{}", job_id, index)
}

/// Recupera el job id desde un chunk id.
pub fn job_of(chunk_id: &str) -> Option<&str> {
    chunk_id.rsplit_once("-c").map(|(job, _)| job)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datos(n: usize) -> Vec<f64> {
        (0..n).map(|i| i as f64).collect()
    }

    #[test]
    fn split_concatenado_reproduce_la_entrada() {
        for (n, k) in [(10_000, 3), (2000, 3), (7, 2), (5, 4), (1, 3)] {
            let data = datos(n);
            let chunks = split(&data, k);
            let rejoined: Vec<f64> = chunks.concat();
            assert_eq!(rejoined, data, "n={} k={}", n, k);
        }
    }

    #[test]
    fn split_usa_tamano_techo_salvo_el_ultimo() {
        let data = datos(10_000);
        let chunks = split(&data, 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 3334);
        assert_eq!(chunks[1].len(), 3334);
        assert_eq!(chunks[2].len(), 3332);
    }

    #[test]
    fn split_nunca_da_mas_de_k_chunks() {
        for n in 1..50 {
            for k in 1..10 {
                let chunks = split(&datos(n), k);
                assert!(chunks.len() <= k, "n={} k={}", n, k);
                let size = n.div_ceil(k);
                for c in &chunks[..chunks.len() - 1] {
                    assert_eq!(c.len(), size, "n={} k={}", n, k);
                }
            }
        }
    }

    #[test]
    fn split_con_menos_datos_que_workers() {
        let chunks = split(&datos(2), 5);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn split_vacio_o_sin_workers() {
        assert!(split(&[], 3).is_empty());
        assert!(split(&datos(3), 0).is_empty());
    }

    #[test]
    fn chunk_id_y_job_of_son_inversos() {
        let id = chunk_id("job-42", 7);
        assert_eq!(id, "job-42-c7");
        assert_eq!(job_of(&id), Some("job-42"));
    }

    #[test]
    fn job_of_tolera_ids_con_guiones() {
        // un uuid con guiones no debe confundir al parser
        let id = chunk_id("550e8400-e29b-41d4", 0);
        assert_eq!(job_of(&id), Some("550e8400-e29b-41d4"));
        assert_eq!(job_of("sin-separador"), None);
    }
}
