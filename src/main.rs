fn main() -> std::process::ExitCode {
    yt_music_downloader_lib::run()
}
