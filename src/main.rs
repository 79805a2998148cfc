use lamella::{Fragment, OpenSettings, Slide};

fn main() {
    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: lamella <jpeg> [<jpeg> ...]");
        eprintln!("opens the files as one vertical stack and prints the level table");
        std::process::exit(2);
    }

    let fragments = paths
        .iter()
        .enumerate()
        .map(|(i, path)| Fragment { z: 0, x: 0, y: i as u32, path: path.into() })
        .collect();

    match Slide::open(fragments, &OpenSettings::default()) {
        Ok(slide) => {
            let (width, height) = slide.dimensions(0);
            println!("{width}x{height}, {} levels", slide.level_count());
            for i in 0..slide.level_count() {
                let info = slide.level_info(i).unwrap();
                println!(
                    "  level {i}: {}x{} (scale 1/{}, downsample {:.1})",
                    info.width, info.height, info.scale_denom, info.downsample
                );
            }
            if let Some(comment) = slide.comment() {
                println!("comment: {comment}");
            }
        }
        Err(e) => {
            eprintln!("failed to open slide: {e}");
            std::process::exit(1);
        }
    }
}
