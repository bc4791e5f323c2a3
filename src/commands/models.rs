use clap::ArgMatches;
use llamaslot_runtime::models::quantization_label;
use llamaslot_runtime::{
    readable_file_size, ModelCatalog, ModelRecord, ModelType, RuntimeConfig, SqliteModelCatalog,
};
use std::path::PathBuf;

pub async fn run(matches: &ArgMatches, config: &RuntimeConfig) -> i32 {
    let catalog = match SqliteModelCatalog::open(&config.catalog_path()) {
        Ok(catalog) => catalog,
        Err(e) => {
            eprintln!("✗ Could not open model catalog: {}", e);
            return 1;
        }
    };

    match matches.subcommand() {
        Some(("list", _)) => list(&catalog).await,
        Some(("show", sub_matches)) => {
            let raw = sub_matches
                .get_one::<String>("id")
                .map(String::as_str)
                .unwrap_or_default();
            match raw.parse::<i64>() {
                Ok(id) => show(&catalog, id).await,
                Err(_) => {
                    eprintln!("✗ '{}' is not a model id", raw);
                    1
                }
            }
        }
        Some(("add", sub_matches)) => add(&catalog, sub_matches).await,
        _ => {
            eprintln!("✗ Unknown models command");
            1
        }
    }
}

async fn list(catalog: &SqliteModelCatalog) -> i32 {
    let models = match catalog.list().await {
        Ok(models) => models,
        Err(e) => {
            eprintln!("✗ {}", e);
            return 1;
        }
    };

    println!("📦 Models\n");
    if models.is_empty() {
        println!("  (none)");
        return 0;
    }
    for model in models {
        println!("  {}", summary_line(&model));
    }
    0
}

fn summary_line(model: &ModelRecord) -> String {
    format!(
        "[{}] {} • {} • {} • {}",
        model.id,
        model.name,
        model.model_type,
        quantization_label(model.quantization),
        readable_file_size(model.file_size)
    )
}

async fn show(catalog: &SqliteModelCatalog, id: i64) -> i32 {
    let model = match catalog.find_by_id(id).await {
        Ok(Some(model)) => model,
        Ok(None) => {
            eprintln!("✗ Model with id {} not found in catalog", id);
            return 1;
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            return 1;
        }
    };

    let on_disk = tokio::fs::try_exists(&model.file_path)
        .await
        .unwrap_or(false);

    println!("📦 {} (id {})\n", model.name, model.id);
    println!("  • Type: {}", model.model_type);
    println!("  • File: {}", model.file_path.display());
    println!(
        "  • On disk: {}",
        if on_disk { "✓ present" } else { "✗ missing" }
    );
    println!("  • Size: {}", readable_file_size(model.file_size));
    println!("  • Quantization: {}", quantization_label(model.quantization));
    println!("  • Context length: {}", model.context_length);
    if !model.params.is_empty() {
        println!("  • Parameters: {}", model.params);
    }
    if !model.architecture.is_empty() {
        println!("  • Architecture: {}", model.architecture);
    }
    0
}

async fn add(catalog: &SqliteModelCatalog, matches: &ArgMatches) -> i32 {
    let model = match record_from_args(matches).await {
        Ok(model) => model,
        Err(e) => {
            eprintln!("✗ {}", e);
            return 1;
        }
    };

    match catalog.insert(&model).await {
        Ok(id) => {
            println!("✓ Imported '{}' as model {}", model.name, id);
            0
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            1
        }
    }
}

async fn record_from_args(matches: &ArgMatches) -> Result<ModelRecord, String> {
    let path = matches
        .get_one::<String>("path")
        .map(PathBuf::from)
        .ok_or_else(|| "--path is required".to_string())?;

    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    if !metadata.is_file() {
        return Err(format!("{} is not a file", path.display()));
    }
    let path = tokio::fs::canonicalize(&path).await.unwrap_or(path);

    let model_type = matches
        .get_one::<String>("type")
        .map(|t| t.parse::<ModelType>())
        .transpose()?
        .unwrap_or(ModelType::MainChat);

    let name = matches
        .get_one::<String>("name")
        .cloned()
        .or_else(|| {
            path.file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "model".to_string());

    let mut model = ModelRecord::new(0, name, path, model_type).with_file_size(metadata.len());
    model.quantization = matches.get_one::<u32>("quantization").copied();
    model.context_length = matches
        .get_one::<u32>("context-length")
        .copied()
        .unwrap_or(0);
    if let Some(params) = matches.get_one::<String>("params") {
        model.params = params.clone();
    }
    if let Some(architecture) = matches.get_one::<String>("architecture") {
        model.architecture = architecture.clone();
    }
    Ok(model)
}
