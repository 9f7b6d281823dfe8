mod helpers;

mod property_tests;
