use crate::config::PipelineConfig;
use crate::error::Result;
use crate::key_mapper::KeyTemplate;
use crate::size_spec::{parse_size_spec, SizeToken};
use crate::transform::content_box;

/// One variant the pipeline would produce for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedVariant {
    pub token: SizeToken,
    pub destination_key: String,
    /// Area the source is fitted into, inside the border.
    pub content_box: (u32, u32),
}

/// Works out the variants for `key` without touching any store.
pub fn plan_variants(key: &str, config: &PipelineConfig) -> Result<Vec<PlannedVariant>> {
    let spec = parse_size_spec(key)?;
    let template = KeyTemplate::new(
        key,
        &spec,
        &config.source_folder,
        &config.destination_folder,
    )?;

    Ok(spec
        .tokens
        .iter()
        .map(|token| PlannedVariant {
            token: token.clone(),
            destination_key: template.render(token),
            content_box: content_box(token.width, token.height, config.border),
        })
        .collect())
}

pub fn print_plan(key: &str, config: &PipelineConfig) -> Result<()> {
    let variants = plan_variants(key, config)?;

    println!("📋 Plan for: {}", key);
    println!("  🎨 Output format: {}", config.output_format);
    println!(
        "  🖼️  Border: {}px, background {}, gravity {:?}",
        config.border, config.background, config.gravity
    );
    println!("  🔧 Codecs: {:?}", config.codecs);
    for variant in &variants {
        println!(
            "  📏 {} -> {} (content box {}x{})",
            variant.token, variant.destination_key, variant.content_box.0, variant.content_box.1
        );
    }
    println!("  📊 {} variant(s)", variants.len());
    Ok(())
}
