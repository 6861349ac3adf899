use {
    std::time::Instant,
    anyhow::{Context, Result, bail, ensure},
    clap::Parser,
    futures::future::join_all,
    reqwest::Client,
    visits_core::CounterResponse,
};

/// Fires concurrent visits at a running server and checks that none of them got lost.
/// Counts visits itself, so point it at a server nobody else is using.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    url: String,

    #[arg(long, default_value_t = 200)]
    requests: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let started_at = Instant::now();
    let client = Client::new();
    let endpoint = format!("{}/api/visitors", args.url.trim_end_matches('/'));

    let baseline = visit(&client, &endpoint).await.context("failed to read baseline")?;
    println!("baseline count: {baseline}");

    let results = join_all((0..args.requests).map(|_| visit(&client, &endpoint))).await;

    let mut counts = Vec::with_capacity(results.len());
    for result in results {
        counts.push(result?);
    }
    counts.sort();

    let expected: Vec<i64> = (baseline + 1..=baseline + args.requests).collect();
    if counts != expected {
        let duplicates = counts.windows(2).filter(|pair| pair[0] == pair[1]).count();
        bail!(
            "lost updates detected: got {} distinct counts for {} requests ({duplicates} duplicates), range {:?}..={:?}",
            counts.len() - duplicates,
            args.requests,
            counts.first(),
            counts.last(),
        );
    }

    let after = visit(&client, &endpoint).await?;
    ensure!(after == baseline + args.requests + 1, "count after run is {after}, expected {}", baseline + args.requests + 1);

    println!("{} concurrent visits counted exactly once in {:?}", args.requests, Instant::now() - started_at);
    Ok(())
}

async fn visit(client: &Client, endpoint: &str) -> Result<i64> {
    let response = client.get(endpoint).send().await?.error_for_status()?;
    let body: CounterResponse = response.json().await?;
    Ok(body.count)
}
