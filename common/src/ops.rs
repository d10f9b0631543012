use std::panic::{self, AssertUnwindSafe};
use std::thread;

/// Valor centinela que sustituye a un elemento cuyo cálculo falló.
pub const ERROR_SENTINEL: f64 = -1.0;

pub type ElementOp = fn(f64) -> f64;

fn complex_op(x: f64) -> f64 {
    (x.sin() + x.cos()).powi(2) / (x.abs().sqrt() + 1.0)
}

fn conditional_op_int(x: f64) -> f64 {
    if (x as i64) % 3 == 0 || (500.0..=1000.0).contains(&x) {
        (x * x.ln()) % 7.0
    } else {
        x
    }
}

fn identity(x: f64) -> f64 {
    x
}

/// Registro de operaciones elemento a elemento, seleccionables por id.
/// Un id desconocido cae en la identidad.
pub fn lookup(operation_id: &str) -> ElementOp {
    match operation_id {
        "COMPLEX_OP" => complex_op,
        "CONDITIONAL_OP_INT" => conditional_op_int,
        _ => identity,
    }
}

/// Aplica la operación a todo un chunk, en paralelo y preservando el orden.
pub fn apply_chunk(operation_id: &str, data: &[f64]) -> Vec<f64> {
    apply_with(lookup(operation_id), data)
}

/// Evalúa `f` sobre cada elemento en paralelo (tantos hilos como núcleos),
/// con resiliencia local: un panic calculando un elemento se reemplaza por
/// ERROR_SENTINEL y nunca aborta el chunk completo.
pub fn apply_with<F>(f: F, data: &[f64]) -> Vec<f64>
where
    F: Fn(f64) -> f64 + Sync,
{
    if data.is_empty() {
        return Vec::new();
    }

    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(data.len());
    let slice_len = data.len().div_ceil(workers);

    let f = &f;
    let eval = move |x: f64| -> f64 {
        panic::catch_unwind(AssertUnwindSafe(|| f(x))).unwrap_or(ERROR_SENTINEL)
    };

    thread::scope(|scope| {
        let handles: Vec<_> = data
            .chunks(slice_len)
            .map(|slice| scope.spawn(move || slice.iter().map(|&x| eval(x)).collect::<Vec<f64>>()))
            .collect();

        let mut out = Vec::with_capacity(data.len());
        for h in handles {
            // un panic dentro del closure ya fue capturado por elemento;
            // si el hilo en sí muere, propagamos (no debería pasar)
            out.extend(h.join().expect("hilo de cálculo caído"));
        }
        out
    })
}
