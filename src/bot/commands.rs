use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Diamond Trading Bot commands:")]
pub enum Command {
    #[command(description = "show the welcome message")]
    Start,
    #[command(description = "list commands")]
    Help,
    #[command(description = "request a new account")]
    CreateAccount,
    #[command(description = "log in")]
    Login,
    #[command(description = "log out")]
    Logout,
    #[command(description = "cancel the current prompt")]
    Reset,
    #[command(description = "clear a stuck conversation and the message limit")]
    Fix,
    #[command(description = "upload stock (suppliers)")]
    Upload,
    #[command(description = "show your session and prompt state")]
    MyState,
    #[command(description = "show database row counts (admins)")]
    TestData,
}

impl Command {
    pub fn help() -> String {
        Command::descriptions().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_are_lowercase() {
        assert_eq!(Command::parse("/createaccount", "diamond_bot").ok(), Some(Command::CreateAccount));
        assert_eq!(Command::parse("/mystate", "diamond_bot").ok(), Some(Command::MyState));
        assert!(Command::parse("/create_account", "diamond_bot").is_err());
        assert!(Command::help().contains("/login"));
    }
}
