pub mod similar;
