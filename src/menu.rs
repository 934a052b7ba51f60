use std::io::{self, Write};

pub fn show_menu() {
    println!("\n===========================================");
    println!("Telemetry Stream");
    println!("===========================================");
    println!("Select an option:");
    println!("1. Start Telemetry Server (WebSocket)");
    println!("2. Console Viewer Demo (async pipeline)");
    println!("3. Console Viewer Demo (threaded pipeline)");
    println!("4. Live Dashboard");
    println!("5. Exit");
    println!("===========================================");
    print!("Choice (1-5): ");
    let _ = io::stdout().flush();
}

pub fn get_user_choice() -> io::Result<Option<u32>> {
    let mut input = String::new();
    if io::stdin().read_line(&mut input)? == 0 {
        // stdin closed
        return Ok(Some(5));
    }
    Ok(input.trim().parse::<u32>().ok())
}

pub fn wait_for_enter() {
    println!("\nPress Enter to return to menu...");
    let mut input = String::new();
    let _ = io::stdin().read_line(&mut input);
}
