//! Cliente de benchmark: reproduce un conjunto fijo de consultas contra el
//! endpoint conversacional a distintas tasas de peticiones por minuto (RPM)
//! y resume las latencias observadas por tasa.
//!
//! Es un cliente puro: sólo habla con el servidor por HTTP y no toca ningún
//! estado interno. Ejecutar con el servidor ya levantado:
//!
//!   cargo run --bin benchmark

use std::env;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::json;

/// Pool de consultas de prueba. Incluye duplicadas a propósito: permiten
/// comprobar que las consultas repetidas no se sirven de ninguna caché.
const TEST_QUERIES: &[&str] = &[
    "What is this project?",
    "How do I install it?",
    "What are the main features?",
    "What is this project?",
    "How do I configure the agent?",
    "What models are supported?",
    "How do I run an evaluation?",
    "What is this project?",
    "How do I get started?",
    "Where are the documents indexed from?",
];

#[derive(Debug)]
struct RequestResult {
    response_time: Duration,
    success: bool,
    error: Option<String>,
    response_chars: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let base_url =
        env::var("BENCH_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:8000".to_string());
    let endpoint = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
    let model = env::var("BENCH_MODEL")
        .or_else(|_| env::var("SERVED_MODEL_ID"))
        .unwrap_or_else(|_| "docs-agent".to_string());
    let rpm_rates: Vec<u32> = env::var("BENCH_RPM")
        .unwrap_or_else(|_| "10,20,50".to_string())
        .split(',')
        .map(|s| s.trim().parse())
        .collect::<Result<_, _>>()
        .context("BENCH_RPM inválido: se espera una lista como '10,20,50'")?;
    let requests_per_test: usize = env::var("BENCH_REQUESTS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()?;

    println!("Benchmark contra {endpoint} (modelo '{model}')");
    println!(
        "Tasas: {:?} RPM | {} peticiones por tasa | {} consultas en el pool\n",
        rpm_rates,
        requests_per_test,
        TEST_QUERIES.len()
    );

    for (i, rpm) in rpm_rates.iter().enumerate() {
        let results = run_rpm_test(&client, &endpoint, &model, *rpm, requests_per_test).await;
        print_summary(*rpm, &results);
        if i + 1 < rpm_rates.len() {
            println!("Pausa de 10s antes de la siguiente tasa...\n");
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    }

    Ok(())
}

/// Lanza `num_requests` peticiones espaciadas para aproximar la tasa RPM
/// objetivo, ciclando sobre el pool de consultas.
async fn run_rpm_test(
    client: &reqwest::Client,
    endpoint: &str,
    model: &str,
    rpm: u32,
    num_requests: usize,
) -> Vec<RequestResult> {
    println!("=== Tasa objetivo: {rpm} RPM ===");
    let delay = Duration::from_secs_f64(60.0 / rpm as f64);
    let test_start = Instant::now();
    let mut results = Vec::with_capacity(num_requests);

    for i in 0..num_requests {
        let query = TEST_QUERIES[i % TEST_QUERIES.len()];

        let target = test_start + delay * i as u32;
        let now = Instant::now();
        if now < target {
            tokio::time::sleep(target - now).await;
        }

        let result = send_request(client, endpoint, model, query).await;
        let elapsed = test_start.elapsed().as_secs_f64();
        let actual_rpm = (i + 1) as f64 / (elapsed / 60.0).max(1e-9);
        println!(
            "[{}/{}] {} {:.2}s | RPM real: {:.1} | {} chars",
            i + 1,
            num_requests,
            if result.success { "ok" } else { "FALLO" },
            result.response_time.as_secs_f64(),
            actual_rpm,
            result.response_chars
        );
        results.push(result);
    }

    results
}

async fn send_request(
    client: &reqwest::Client,
    endpoint: &str,
    model: &str,
    query: &str,
) -> RequestResult {
    let started = Instant::now();
    let payload = json!({
        "model": model,
        "messages": [{ "role": "user", "content": query }]
    });

    match client.post(endpoint).json(&payload).send().await {
        Ok(resp) if resp.status().is_success() => match resp.json::<serde_json::Value>().await {
            Ok(body) => {
                let content = body["choices"][0]["message"]["content"]
                    .as_str()
                    .unwrap_or("");
                RequestResult {
                    response_time: started.elapsed(),
                    success: true,
                    error: None,
                    response_chars: content.len(),
                }
            }
            Err(e) => RequestResult {
                response_time: started.elapsed(),
                success: false,
                error: Some(format!("respuesta ilegible: {e}")),
                response_chars: 0,
            },
        },
        Ok(resp) => RequestResult {
            response_time: started.elapsed(),
            success: false,
            error: Some(format!("HTTP {}", resp.status())),
            response_chars: 0,
        },
        Err(e) => RequestResult {
            response_time: started.elapsed(),
            success: false,
            error: Some(e.to_string()),
            response_chars: 0,
        },
    }
}

fn print_summary(rpm: u32, results: &[RequestResult]) {
    let times: Vec<f64> = results
        .iter()
        .filter(|r| r.success)
        .map(|r| r.response_time.as_secs_f64())
        .collect();
    let failures: Vec<&RequestResult> = results.iter().filter(|r| !r.success).collect();

    println!("--- Resumen {rpm} RPM ---");
    println!("  Éxitos: {}/{}", times.len(), results.len());

    if !failures.is_empty() {
        for f in failures.iter().take(3) {
            println!("  Fallo: {}", f.error.as_deref().unwrap_or("desconocido"));
        }
        if failures.len() > 3 {
            println!("  ... y {} fallos más", failures.len() - 3);
        }
    }

    if times.is_empty() {
        println!();
        return;
    }

    let mut sorted = times.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mean = times.iter().sum::<f64>() / times.len() as f64;
    println!(
        "  Latencia: min {:.2}s | media {:.2}s | mediana {:.2}s | p95 {:.2}s | max {:.2}s\n",
        sorted[0],
        mean,
        percentile(&sorted, 50),
        percentile(&sorted, 95),
        sorted[sorted.len() - 1]
    );
}

/// Percentil sobre una lista ya ordenada ascendentemente (método del rango
/// más cercano). Requiere una lista no vacía.
fn percentile(sorted: &[f64], pct: usize) -> f64 {
    let idx = (sorted.len() * pct / 100).min(sorted.len() - 1);
    sorted[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentil_sobre_lista_conocida() {
        let sorted = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        assert_eq!(percentile(&sorted, 50), 6.0);
        assert_eq!(percentile(&sorted, 95), 10.0);
        assert_eq!(percentile(&sorted, 0), 1.0);
    }

    #[test]
    fn percentil_con_un_unico_elemento() {
        let sorted = vec![3.5];
        assert_eq!(percentile(&sorted, 50), 3.5);
        assert_eq!(percentile(&sorted, 95), 3.5);
    }
}
