mod app;

use std::env;

use tiny_rasterizer::logging::{init_logging, LoggingConfig};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;

#[show_image::main]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Default values.
    let mut asset_path = String::from("assets/scene.gltf");
    let mut texture_path = None;
    let mut preset = String::from("default");
    let mut output_path = None;
    let mut print_fps = false;
    let mut log_filter = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-p" => { asset_path = args.next().ok_or("-p expects a scene path")?; }
            "-t" => { texture_path = Some(args.next().ok_or("-t expects a texture path")?); }
            "-s" => { preset = args.next().ok_or("-s expects a preset name")?; }
            "-o" => { output_path = Some(args.next().ok_or("-o expects an output path")?); }
            "-l" => { log_filter = Some(args.next().ok_or("-l expects a log filter")?); }
            "--fps" => { print_fps = true; }
            other => { return Err(format!("unknown argument `{}`", other).into()); }
        }
    }

    init_logging(LoggingConfig {
        env_filter: log_filter,
        ..Default::default()
    });

    let params = app::Params {
        width: WIDTH,
        height: HEIGHT,
        print_fps,
        asset_path,
        texture_path,
        preset,
        output_path,
    };

    app::run(params)?;

    return Ok(());
}
