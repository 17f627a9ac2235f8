mod triangle;

use std::path::PathBuf;
use std::sync::Arc;
use clap::{Parser, ValueEnum};
use keel_core::cli::EngineArgs;
use keel_rhi::{Device, DeviceConfigBuilder, HeadlessBackend};

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum BackendKind {
    #[default]
    Headless,
    Vulkan,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Records and submits a triangle through the Keel RHI")]
struct SandboxArgs {
    #[command(flatten)]
    engine: EngineArgs,

    /// Backend to run on
    #[arg(short = 'b', long = "backend", value_enum, default_value_t = BackendKind::Headless)]
    backend: BackendKind,

    /// Directory holding `triangle.vert.spv` and `triangle.frag.spv`
    #[arg(long = "shaders")]
    shaders: Option<PathBuf>,
}

fn run_headless(args: &SandboxArgs) -> anyhow::Result<()> {
    let config = DeviceConfigBuilder::default()
        .name("keel-sandbox")
        .headless_auto_complete(true)
        .build()?;
    let device = Device::new(HeadlessBackend::from_config(&config), config);
    triangle::run(&device, args.engine.frames, None)?;

    let stats = device.backend().stats();
    log::info!("headless backend: {stats:?}");
    Ok(())
}

fn run_vulkan(args: &SandboxArgs) -> anyhow::Result<()> {
    use keel_rhi::vulkan::{VulkanBackend, VulkanContext};

    let Some(shaders) = args.shaders.as_deref() else {
        anyhow::bail!("the vulkan backend needs --shaders pointing at compiled SPIR-V");
    };

    let context = Arc::new(VulkanContext::new("keel-sandbox")?);
    let backend = VulkanBackend::new(context)?;
    let config = DeviceConfigBuilder::default().name("keel-sandbox").build()?;
    let device = Device::new(backend, config);
    log::info!("running on {}", keel_rhi::Backend::name(device.backend()));

    triangle::run(&device, args.engine.frames, Some(shaders))
}

fn main() -> anyhow::Result<()> {
    let args = SandboxArgs::parse();
    keel_core::log::initialize(args.engine.log_level.into())?;

    let _puffin_server = if args.engine.profile {
        profiling::puffin::set_scopes_on(true);
        let server_addr = format!("127.0.0.1:{}", puffin_http::DEFAULT_PORT);
        log::info!("serving profiler data on {server_addr}");
        Some(puffin_http::Server::new(&server_addr)?)
    } else {
        None
    };

    match args.backend {
        BackendKind::Headless => run_headless(&args),
        BackendKind::Vulkan => run_vulkan(&args),
    }
}
